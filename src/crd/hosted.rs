//! Hosted control plane resource definitions
//!
//! A HostedControlPlane lives in a dedicated namespace on the management
//! cluster and runs the API server for one hosted cluster. The owning
//! HostedCluster lives elsewhere and is reachable only through the
//! back-reference annotation on the HostedControlPlane.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation on a HostedControlPlane naming its owning HostedCluster
/// as `<namespace>/<name>`.
pub const CLUSTER_REF_ANNOTATION: &str = "glasskey.dev/cluster";

/// Specification for a HostedControlPlane
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "glasskey.dev",
    version = "v1alpha1",
    kind = "HostedControlPlane",
    plural = "hostedcontrolplanes",
    shortname = "hcp",
    status = "HostedControlPlaneStatus",
    namespaced,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HostedControlPlaneSpec {
    /// DNS name the hosted API server is published under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_api_server_dns_name: Option<String>,

    /// Platform-assigned identifier for the hosted cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
}

/// Status for a HostedControlPlane
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostedControlPlaneStatus {
    /// Conditions reported by the control plane operator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl HostedControlPlane {
    /// True if the control plane operator reports the Available condition
    pub fn is_available(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| {
                s.conditions
                    .iter()
                    .any(|c| c.type_ == "Available" && c.status == "True")
            })
            .unwrap_or(false)
    }
}

/// Specification for a HostedCluster
///
/// Carries the connection information the broker needs to build a
/// kubeconfig for the hosted API server.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "glasskey.dev",
    version = "v1alpha1",
    kind = "HostedCluster",
    plural = "hostedclusters",
    namespaced,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".spec.apiEndpoint"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HostedClusterSpec {
    /// Host the hosted API server is reachable at
    pub api_endpoint: String,

    /// Port for the hosted API server (defaults to 443)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_port: Option<u16>,

    /// PEM CA bundle for verifying the hosted API server, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
}

impl HostedClusterSpec {
    /// Full URL of the hosted API server
    pub fn server_url(&self) -> String {
        format!("https://{}:{}", self.api_endpoint, self.api_port.unwrap_or(443))
    }
}

/// A standard condition on a resource status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g. "Available")
    #[serde(rename = "type")]
    pub type_: String,

    /// Condition status: "True", "False", or "Unknown"
    pub status: String,

    /// Machine-readable reason for the condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hcp_with_conditions(conditions: Vec<Condition>) -> HostedControlPlane {
        let mut hcp = HostedControlPlane::new("cp", HostedControlPlaneSpec::default());
        hcp.status = Some(HostedControlPlaneStatus { conditions });
        hcp
    }

    #[test]
    fn test_available_requires_true_condition() {
        let hcp = hcp_with_conditions(vec![Condition {
            type_: "Available".to_string(),
            status: "True".to_string(),
            reason: None,
            message: None,
        }]);
        assert!(hcp.is_available());

        let hcp = hcp_with_conditions(vec![Condition {
            type_: "Available".to_string(),
            status: "False".to_string(),
            reason: Some("EtcdUnhealthy".to_string()),
            message: None,
        }]);
        assert!(!hcp.is_available());

        let hcp = HostedControlPlane::new("cp", HostedControlPlaneSpec::default());
        assert!(!hcp.is_available());
    }

    #[test]
    fn test_server_url_defaults_to_443() {
        let spec = HostedClusterSpec {
            api_endpoint: "api.cluster.example.com".to_string(),
            api_port: None,
            ca_bundle: None,
        };
        assert_eq!(spec.server_url(), "https://api.cluster.example.com:443");

        let spec = HostedClusterSpec {
            api_port: Some(6443),
            ..spec
        };
        assert_eq!(spec.server_url(), "https://api.cluster.example.com:6443");
    }
}
