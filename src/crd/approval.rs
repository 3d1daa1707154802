//! CSR approval record
//!
//! An external signer running next to each hosted control plane only
//! approves CertificateSigningRequests that are accompanied by one of
//! these records in the control plane namespace. The record shares its
//! name with the CSR it approves; its presence is the approval intent,
//! so the spec carries audit fields only.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a CertificateSigningRequestApproval
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "glasskey.dev",
    version = "v1alpha1",
    kind = "CertificateSigningRequestApproval",
    plural = "certificatesigningrequestapprovals",
    shortname = "csra",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSigningRequestApprovalSpec {
    /// Operator the approved certificate is minted for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}
