//! Certificate request issuance and approval tracking
//!
//! Key pairs are generated locally and never leave the process; only the
//! PEM CSR travels to the management cluster. CSR objects are keyed by a
//! digest of (key material, subject) so repeated submissions of the same
//! request converge on one object instead of piling up pending CSRs.
//! Approval is asynchronous: an external signer approves and issues, and
//! this module only reads the resulting phase.

use std::fmt;
use std::fmt::Write as _;
use std::time::Duration;

use aws_lc_rs::digest;
use k8s_openapi::api::certificates::v1::{
    CertificateSigningRequest, CertificateSigningRequestSpec,
};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair};
use tracing::{debug, info, warn};

use crate::crd::{CertificateSigningRequestApproval, CertificateSigningRequestApprovalSpec};
use crate::locator::ControlPlaneApi;
use crate::{Error, Result};

/// Annotation on CSR objects carrying the request digest
pub const DIGEST_ANNOTATION: &str = "glasskey.dev/csr-digest";

/// Label marking objects owned by this broker
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Label value for [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "glasskey";

/// Kubernetes rejects expirationSeconds below 10 minutes
pub const MIN_CSR_EXPIRATION_SECONDS: i32 = 600;

/// Certificates are never minted for longer than 24 hours
pub const MAX_CSR_EXPIRATION_SECONDS: i32 = 86_400;

const CSR_NAME_PREFIX: &str = "breakglass-";
const DIGEST_NAME_LEN: usize = 20;

/// X.509 subject for a breakglass certificate.
///
/// The common name carries the operator identity in the
/// `system:breakglass:<user>` convention the signer expects; the
/// organization carries the access group the hosted cluster's RBAC
/// binds against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subject {
    /// Certificate common name
    pub common_name: String,
    /// Certificate organization
    pub organization: String,
}

impl Subject {
    /// Build the subject for an operator and access group
    pub fn for_operator(user: &str, access_group: &str) -> Self {
        Self {
            common_name: format!("system:breakglass:{}", user),
            organization: access_group.to_string(),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CN={},O={}", self.common_name, self.organization)
    }
}

/// A locally generated key pair plus the PEM CSR for it.
pub struct CertificateRequest {
    key_pem: String,
    csr_pem: String,
    subject: Subject,
    digest: String,
}

impl CertificateRequest {
    /// Generate a fresh key pair and CSR for the subject
    pub fn generate(subject: Subject) -> Result<Self> {
        let key_pair = KeyPair::generate()
            .map_err(|e| Error::pki(format!("failed to generate key pair: {}", e)))?;
        Self::from_key_pair(key_pair, subject)
    }

    /// Build a CSR for an existing private key.
    ///
    /// Same key and subject yield the same digest, which is what makes
    /// retried submissions land on the same CSR object.
    pub fn from_key_pem(key_pem: &str, subject: Subject) -> Result<Self> {
        let key_pair = KeyPair::from_pem(key_pem)
            .map_err(|e| Error::pki(format!("failed to parse private key: {}", e)))?;
        Self::from_key_pair(key_pair, subject)
    }

    fn from_key_pair(key_pair: KeyPair, subject: Subject) -> Result<Self> {
        let key_pem = key_pair.serialize_pem();

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(subject.common_name.clone()),
        );
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String(subject.organization.clone()),
        );
        params.distinguished_name = dn;

        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| Error::pki(format!("failed to create CSR: {}", e)))?;
        let csr_pem = csr
            .pem()
            .map_err(|e| Error::pki(format!("failed to serialize CSR: {}", e)))?;

        let digest = compute_digest(&key_pem, &subject);

        Ok(Self {
            key_pem,
            csr_pem,
            subject,
            digest,
        })
    }

    /// Private key in PEM format (kept local)
    pub fn private_key_pem(&self) -> &str {
        &self.key_pem
    }

    /// CSR in PEM format (sent to the management cluster)
    pub fn csr_pem(&self) -> &str {
        &self.csr_pem
    }

    /// The request subject
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Digest over (key material, subject)
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Deterministic CSR object name for this request
    pub fn csr_name(&self) -> String {
        format!("{}{}", CSR_NAME_PREFIX, &self.digest[..DIGEST_NAME_LEN])
    }
}

/// SHA-256 over the private key PEM and subject string, lowercase hex.
/// Identifies the (key pair, subject) combination; the digest itself
/// reveals nothing about the key.
fn compute_digest(key_pem: &str, subject: &Subject) -> String {
    let mut ctx = digest::Context::new(&digest::SHA256);
    ctx.update(key_pem.as_bytes());
    ctx.update(subject.to_string().as_bytes());
    let sum = ctx.finish();

    let mut out = String::with_capacity(sum.as_ref().len() * 2);
    for byte in sum.as_ref() {
        // Writing to a String is infallible.
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Signer name for breakglass CSRs in the given control plane namespace.
/// Must match the signer deployed next to the hosted control plane.
pub fn signer_name(hcp_namespace: &str) -> String {
    format!("glasskey.dev/{}.breakglass", hcp_namespace)
}

/// Clamp a session TTL into the expirationSeconds window Kubernetes and
/// the signer accept. Session access is governed by session expiry, not
/// certificate expiry, so rounding up to the floor is safe.
pub fn csr_expiration_seconds(ttl: Duration) -> i32 {
    let secs = ttl.as_secs().min(MAX_CSR_EXPIRATION_SECONDS as u64) as i32;
    secs.max(MIN_CSR_EXPIRATION_SECONDS)
}

/// Observed phase of a certificate request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CsrPhase {
    /// Submitted, not yet approved
    Pending,
    /// Approved, certificate not yet issued
    Approved,
    /// Certificate issued (PEM bytes from the CSR status)
    Issued(Vec<u8>),
    /// Denied by the signer with the given reason
    Denied(String),
}

/// Idempotent CSR lifecycle operations against one management cluster.
#[derive(Clone, Debug, Default)]
pub struct CsrTracker;

impl CsrTracker {
    /// Create a tracker
    pub fn new() -> Self {
        Self
    }

    /// Submit a certificate request, converging on one CSR object per
    /// digest, and ensure its approval record exists.
    ///
    /// An existing CSR with a matching digest annotation is reused as
    /// is. A CSR under the same name with a different digest is deleted
    /// together with its approval and recreated, so a stale or foreign
    /// object can never satisfy this request.
    pub async fn request_certificate(
        &self,
        api: &dyn ControlPlaneApi,
        hcp_namespace: &str,
        request: &CertificateRequest,
        ttl: Duration,
    ) -> Result<String> {
        let name = request.csr_name();

        match api.get_csr(&name).await? {
            Some(existing) if self.digest_matches(&existing, request.digest()) => {
                debug!(csr = %name, "reusing existing certificate request");
            }
            Some(_) => {
                warn!(csr = %name, "existing certificate request has a different digest, recreating");
                api.delete_csr(&name).await?;
                api.delete_csr_approval(hcp_namespace, &name).await?;
                let csr = self.build_csr(&name, hcp_namespace, request, ttl);
                api.create_csr(&csr).await?;
                info!(csr = %name, namespace = %hcp_namespace, "created certificate request");
            }
            None => {
                let csr = self.build_csr(&name, hcp_namespace, request, ttl);
                api.create_csr(&csr).await?;
                info!(csr = %name, namespace = %hcp_namespace, "created certificate request");
            }
        }

        self.ensure_approval(api, hcp_namespace, &name, &request.subject().common_name)
            .await?;

        Ok(name)
    }

    /// Report the phase of a tracked certificate request.
    ///
    /// The digest annotation must still match `expected_digest`; a
    /// mismatch means the object was replaced out from under us and is
    /// reported as a conflict rather than someone else's certificate.
    pub async fn phase(
        &self,
        api: &dyn ControlPlaneApi,
        name: &str,
        expected_digest: &str,
    ) -> Result<CsrPhase> {
        let csr = api
            .get_csr(name)
            .await?
            .ok_or_else(|| Error::not_found(format!("CertificateSigningRequest {}", name)))?;

        if !self.digest_matches(&csr, expected_digest) {
            return Err(Error::conflict(format!(
                "CertificateSigningRequest {} digest does not match this session",
                name
            )));
        }

        let Some(status) = csr.status else {
            return Ok(CsrPhase::Pending);
        };

        let conditions = status.conditions.unwrap_or_default();
        for condition in &conditions {
            if condition.type_ == "Denied" && condition.status == "True" {
                let reason = condition
                    .message
                    .clone()
                    .or_else(|| condition.reason.clone())
                    .unwrap_or_else(|| "request denied by signer".to_string());
                return Ok(CsrPhase::Denied(reason));
            }
        }

        if let Some(cert) = status.certificate {
            if !cert.0.is_empty() {
                return Ok(CsrPhase::Issued(cert.0));
            }
        }

        let approved = conditions
            .iter()
            .any(|c| c.type_ == "Approved" && c.status == "True");
        if approved {
            Ok(CsrPhase::Approved)
        } else {
            Ok(CsrPhase::Pending)
        }
    }

    /// Delete a certificate request and its approval record. Both
    /// deletes tolerate already-missing objects.
    pub async fn remove(
        &self,
        api: &dyn ControlPlaneApi,
        hcp_namespace: &str,
        name: &str,
    ) -> Result<()> {
        api.delete_csr(name).await?;
        api.delete_csr_approval(hcp_namespace, name).await?;
        Ok(())
    }

    async fn ensure_approval(
        &self,
        api: &dyn ControlPlaneApi,
        hcp_namespace: &str,
        name: &str,
        requested_by: &str,
    ) -> Result<()> {
        if api.get_csr_approval(hcp_namespace, name).await?.is_some() {
            return Ok(());
        }

        let approval = CertificateSigningRequestApproval::new(
            name,
            CertificateSigningRequestApprovalSpec {
                requested_by: Some(requested_by.to_string()),
            },
        );
        api.create_csr_approval(hcp_namespace, &approval).await?;
        info!(approval = %name, namespace = %hcp_namespace, "created approval record");
        Ok(())
    }

    fn digest_matches(&self, csr: &CertificateSigningRequest, expected: &str) -> bool {
        csr.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(DIGEST_ANNOTATION))
            .map(|d| d == expected)
            .unwrap_or(false)
    }

    fn build_csr(
        &self,
        name: &str,
        hcp_namespace: &str,
        request: &CertificateRequest,
        ttl: Duration,
    ) -> CertificateSigningRequest {
        CertificateSigningRequest {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    [(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())]
                        .into_iter()
                        .collect(),
                ),
                annotations: Some(
                    [(DIGEST_ANNOTATION.to_string(), request.digest().to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            spec: CertificateSigningRequestSpec {
                request: ByteString(request.csr_pem().as_bytes().to_vec()),
                signer_name: signer_name(hcp_namespace),
                expiration_seconds: Some(csr_expiration_seconds(ttl)),
                usages: Some(vec![
                    "client auth".to_string(),
                    "digital signature".to_string(),
                ]),
                ..Default::default()
            },
            status: None,
        }
    }
}
