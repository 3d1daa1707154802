//! Management-cluster location and target resolution
//!
//! Given an opaque target reference from an operator, this module finds
//! the management cluster's HostedControlPlane for that target and
//! follows its back-reference annotation to the owning HostedCluster.
//! Resolution is fail-loud: zero control planes is not-found, more than
//! one is a conflict that needs a human, and nothing is ever picked
//! silently.

mod client;

pub use client::{
    ControlPlaneApi, ControlPlaneApiFactory, CredentialProvider, KubeApiFactory,
    KubeControlPlaneApi,
};

#[cfg(test)]
pub use client::MockControlPlaneApi;
#[cfg(test)]
pub use client::MockControlPlaneApiFactory;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use kube::ResourceExt;
use tracing::debug;

use crate::crd::{HostedCluster, HostedControlPlane, CLUSTER_REF_ANNOTATION};
use crate::{Error, Result};

/// An operator-supplied reference to a hosted control plane.
///
/// The canonical form is the control plane namespace, optionally
/// followed by `/<name>` to pin the expected resource name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetReference {
    namespace: String,
    name: Option<String>,
}

impl TargetReference {
    /// Parse a raw target string of the form `<namespace>` or
    /// `<namespace>/<name>`.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split('/').collect();
        let malformed = || {
            Error::malformed_reference(format!(
                "target {:?} is not <namespace> or <namespace>/<name>",
                raw
            ))
        };

        match parts.as_slice() {
            [namespace] if is_valid_segment(namespace) => Ok(Self {
                namespace: namespace.to_string(),
                name: None,
            }),
            [namespace, name] if is_valid_segment(namespace) && is_valid_segment(name) => {
                Ok(Self {
                    namespace: namespace.to_string(),
                    name: Some(name.to_string()),
                })
            }
            _ => Err(malformed()),
        }
    }

    /// Namespace the control plane is expected in
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Pinned control plane name, if the reference carried one
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl FromStr for TargetReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for TargetReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}/{}", self.namespace, name),
            None => write!(f, "{}", self.namespace),
        }
    }
}

/// Typed back-reference to a HostedCluster, parsed from the
/// `glasskey.dev/cluster` annotation.
///
/// The raw annotation string never travels past this boundary; callers
/// work with the two named fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterRef {
    /// Namespace of the HostedCluster
    pub namespace: String,
    /// Name of the HostedCluster
    pub name: String,
}

impl ClusterRef {
    /// Parse a `<namespace>/<name>` annotation value. Anything other
    /// than exactly two non-empty segments is malformed.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split('/').collect();
        match parts.as_slice() {
            [namespace, name] if is_valid_segment(namespace) && is_valid_segment(name) => {
                Ok(Self {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(Error::malformed_reference(format!(
                "cluster annotation {:?} is not <namespace>/<name>",
                raw
            ))),
        }
    }
}

impl fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

fn is_valid_segment(s: &str) -> bool {
    !s.is_empty() && s.len() <= 253 && !s.contains(char::is_whitespace)
}

/// Resolves target references against one management cluster.
pub struct Locator {
    api: Arc<dyn ControlPlaneApi>,
}

impl Locator {
    /// Create a locator over the given management-cluster client
    pub fn new(api: Arc<dyn ControlPlaneApi>) -> Self {
        Self { api }
    }

    /// Resolve a target to the single HostedControlPlane in its
    /// namespace.
    ///
    /// Zero control planes is `NotFound`; more than one is `Conflict`
    /// naming the namespace and count, never a silent pick. A pinned
    /// name that does not match the single resource is `NotFound`.
    pub async fn hosted_control_plane(
        &self,
        target: &TargetReference,
    ) -> Result<HostedControlPlane> {
        let namespace = target.namespace();
        let mut planes = self.api.list_hosted_control_planes(namespace).await?;

        match planes.len() {
            0 => Err(Error::not_found(format!(
                "no HostedControlPlane in namespace {}",
                namespace
            ))),
            1 => {
                let hcp = planes.remove(0);
                if let Some(expected) = target.name() {
                    if hcp.name_any() != expected {
                        return Err(Error::not_found(format!(
                            "HostedControlPlane {} not found in namespace {} (found {})",
                            expected,
                            namespace,
                            hcp.name_any()
                        )));
                    }
                }
                debug!(namespace = %namespace, name = %hcp.name_any(), "resolved control plane");
                Ok(hcp)
            }
            n => Err(Error::conflict(format!(
                "{} HostedControlPlanes found in namespace {}, expected exactly one",
                n, namespace
            ))),
        }
    }

    /// Follow a HostedControlPlane's back-reference annotation to its
    /// owning HostedCluster.
    ///
    /// A missing or malformed annotation is `MalformedReference`; an
    /// annotation pointing at a HostedCluster that does not exist is
    /// `NotFound`, kept distinct from transport failures which surface
    /// as `Kube` errors.
    pub async fn hosted_cluster(
        &self,
        hcp: &HostedControlPlane,
    ) -> Result<(ClusterRef, HostedCluster)> {
        let raw = hcp
            .annotations()
            .get(CLUSTER_REF_ANNOTATION)
            .ok_or_else(|| {
                Error::malformed_reference(format!(
                    "HostedControlPlane {} has no {} annotation",
                    hcp.name_any(),
                    CLUSTER_REF_ANNOTATION
                ))
            })?;

        let cluster_ref = ClusterRef::parse(raw)?;

        let cluster = self
            .api
            .get_hosted_cluster(&cluster_ref.namespace, &cluster_ref.name)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("HostedCluster {} not found", cluster_ref))
            })?;

        debug!(cluster = %cluster_ref, "resolved hosted cluster");
        Ok((cluster_ref, cluster))
    }
}
