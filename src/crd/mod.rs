//! Custom Resource Definitions consumed by the broker
//!
//! The broker does not own these resource types. HostedControlPlane and
//! HostedCluster are created by the hosting platform; the approval record
//! is written by the broker and consumed by the external signer.

mod approval;
mod hosted;

pub use approval::{CertificateSigningRequestApproval, CertificateSigningRequestApprovalSpec};
pub use hosted::{
    Condition, HostedCluster, HostedClusterSpec, HostedControlPlane, HostedControlPlaneSpec,
    HostedControlPlaneStatus, CLUSTER_REF_ANNOTATION,
};
