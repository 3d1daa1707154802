//! Kubeconfig synthesis for ready sessions
//!
//! The broker builds a minimal kubeconfig from the issued client
//! certificate, the session's private key, and the HostedCluster's
//! connection info. The types here serialize exactly the fields a
//! kubeconfig consumer expects, dash-cased keys included.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use x509_parser::prelude::*;

use crate::{Error, Result};

#[derive(Debug, Serialize)]
struct Kubeconfig {
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    kind: &'static str,
    clusters: Vec<NamedCluster>,
    contexts: Vec<NamedContext>,
    #[serde(rename = "current-context")]
    current_context: String,
    users: Vec<NamedUser>,
}

#[derive(Debug, Serialize)]
struct NamedCluster {
    name: String,
    cluster: Cluster,
}

#[derive(Debug, Serialize)]
struct Cluster {
    server: String,
    #[serde(
        rename = "certificate-authority-data",
        skip_serializing_if = "Option::is_none"
    )]
    certificate_authority_data: Option<String>,
}

#[derive(Debug, Serialize)]
struct NamedContext {
    name: String,
    context: Context,
}

#[derive(Debug, Serialize)]
struct Context {
    cluster: String,
    user: String,
}

#[derive(Debug, Serialize)]
struct NamedUser {
    name: String,
    user: User,
}

#[derive(Debug, Serialize)]
struct User {
    #[serde(rename = "client-certificate-data")]
    client_certificate_data: String,
    #[serde(rename = "client-key-data")]
    client_key_data: String,
}

const USER_NAME: &str = "breakglass";

/// Render a kubeconfig YAML for a hosted API server.
///
/// Without a CA bundle the cluster entry carries no CA data and the
/// consumer's system trust store verifies the serving certificate.
/// Server verification is never disabled.
pub fn render(
    cluster_name: &str,
    server_url: &str,
    ca_bundle: Option<&str>,
    client_cert_pem: &[u8],
    client_key_pem: &str,
) -> Result<String> {
    let context_name = format!("{}-breakglass", cluster_name);

    let config = Kubeconfig {
        api_version: "v1",
        kind: "Config",
        clusters: vec![NamedCluster {
            name: cluster_name.to_string(),
            cluster: Cluster {
                server: server_url.to_string(),
                certificate_authority_data: ca_bundle.map(|ca| STANDARD.encode(ca.as_bytes())),
            },
        }],
        contexts: vec![NamedContext {
            name: context_name.clone(),
            context: Context {
                cluster: cluster_name.to_string(),
                user: USER_NAME.to_string(),
            },
        }],
        current_context: context_name,
        users: vec![NamedUser {
            name: USER_NAME.to_string(),
            user: User {
                client_certificate_data: STANDARD.encode(client_cert_pem),
                client_key_data: STANDARD.encode(client_key_pem.as_bytes()),
            },
        }],
    };

    serde_yaml::to_string(&config)
        .map_err(|e| Error::serialization(format!("failed to render kubeconfig: {}", e)))
}

/// Check that an issued certificate parses and is currently within its
/// validity window. Run before the certificate is handed to a caller so
/// a stale issuance never produces a Ready session.
pub fn check_certificate_validity(cert_pem: &[u8]) -> Result<()> {
    let pem_str = std::str::from_utf8(cert_pem)
        .map_err(|e| Error::pki(format!("issued certificate is not UTF-8 PEM: {}", e)))?;
    let pem_obj = ::pem::parse(pem_str.as_bytes())
        .map_err(|e| Error::pki(format!("failed to parse issued certificate PEM: {}", e)))?;

    let (_, cert) = X509Certificate::from_der(pem_obj.contents())
        .map_err(|e| Error::pki(format!("failed to parse issued certificate: {}", e)))?;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| Error::pki(format!("system clock before epoch: {}", e)))?
        .as_secs() as i64;

    if now < cert.validity().not_before.timestamp() {
        return Err(Error::pki("issued certificate not yet valid"));
    }
    if now > cert.validity().not_after.timestamp() {
        return Err(Error::pki("issued certificate already expired"));
    }

    Ok(())
}
