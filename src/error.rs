//! Error types for the breakglass broker

use thiserror::Error;

/// Main error type for broker operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A required resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// An ambiguous or contradictory state that needs operator attention
    #[error("conflict: {0}")]
    Conflict(String),

    /// A reference string that does not match the expected shape
    #[error("malformed reference: {0}")]
    MalformedReference(String),

    /// The certificate request was denied by the approver
    #[error("denied: {0}")]
    Denied(String),

    /// The session's validity window has elapsed
    #[error("expired: {0}")]
    Expired(String),

    /// Validation error for caller-supplied parameters
    #[error("validation error: {0}")]
    Validation(String),

    /// Key generation or certificate handling error
    #[error("pki error: {0}")]
    Pki(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a not-found error with the given message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error with the given message
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a malformed-reference error with the given message
    pub fn malformed_reference(msg: impl Into<String>) -> Self {
        Self::MalformedReference(msg.into())
    }

    /// Create a denied error with the given message
    pub fn denied(msg: impl Into<String>) -> Self {
        Self::Denied(msg.into())
    }

    /// Create an expired error with the given message
    pub fn expired(msg: impl Into<String>) -> Self {
        Self::Expired(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a PKI error with the given message
    pub fn pki(msg: impl Into<String>) -> Self {
        Self::Pki(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// True for failures that will never succeed on retry with the
    /// same inputs. Callers should surface these instead of polling again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_)
                | Self::MalformedReference(_)
                | Self::Denied(_)
                | Self::Expired(_)
                | Self::Validation(_)
        )
    }

    /// True for failures that a later retry may resolve, such as API
    /// timeouts, throttling, or server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(ae)) => {
                matches!(ae.code, 408 | 429 | 500 | 502 | 503 | 504)
            }
            // Connection-level failures (DNS, TLS, refused) are worth
            // retrying; client-side failures like response deserialization
            // or request building will fail the same way again.
            Self::Kube(kube::Error::HyperError(_)) | Self::Kube(kube::Error::Service(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error Propagation Through the Session Lifecycle
    // ==========================================================================
    //
    // These tests demonstrate how errors flow through the broker during
    // session creation and polling. Each variant represents a distinct
    // failure category with its own handling requirement.

    /// Story: a namespace with no control plane fails loudly
    ///
    /// When the target namespace contains zero HostedControlPlanes the
    /// locator reports not-found with enough context to act on.
    #[test]
    fn story_missing_control_plane_is_not_found() {
        let err = Error::not_found("no HostedControlPlane in namespace ocm-prod-abc123");
        assert!(err.to_string().contains("not found"));
        assert!(err.to_string().contains("ocm-prod-abc123"));
        assert!(!err.is_terminal());
        assert!(!err.is_transient());
    }

    /// Story: an ambiguous namespace is never resolved silently
    ///
    /// Two HostedControlPlanes in one namespace is a state that needs a
    /// human. The broker refuses to pick one and the error is terminal.
    #[test]
    fn story_ambiguous_namespace_is_terminal_conflict() {
        let err = Error::conflict("2 HostedControlPlanes found in namespace ocm-prod-abc123");
        assert!(err.to_string().contains("conflict"));
        assert!(err.is_terminal());
        assert!(!err.is_transient());
    }

    /// Story: malformed back-references are rejected at the boundary
    #[test]
    fn story_malformed_reference_rejected() {
        let err = Error::malformed_reference("cluster annotation \"a/b/c\" is not <namespace>/<name>");
        assert!(err.to_string().contains("malformed reference"));
        assert!(err.is_terminal());

        match err {
            Error::MalformedReference(msg) => assert!(msg.contains("a/b/c")),
            _ => panic!("Expected MalformedReference variant"),
        }
    }

    /// Story: denial and expiry are stable terminal outcomes
    ///
    /// Once a session is denied or expired, every subsequent poll must
    /// report the same category so callers can stop polling.
    #[test]
    fn story_denied_and_expired_are_terminal() {
        let denied = Error::denied("signer rejected request: subject not permitted");
        assert!(denied.is_terminal());
        assert!(denied.to_string().contains("denied"));

        let expired = Error::expired("session bg-1f2e expired at 2026-08-23T10:00:00Z");
        assert!(expired.is_terminal());
        assert!(expired.to_string().contains("expired"));
    }

    /// Story: API throttling is transient, missing resources are not
    ///
    /// A 429 from the management cluster should be retried; a 404 mapped
    /// to NotFound is a real answer about the world, not a hiccup.
    #[test]
    fn story_transient_classification_for_api_errors() {
        let throttled = Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "too many requests".to_string(),
            reason: "TooManyRequests".to_string(),
            code: 429,
        }));
        assert!(throttled.is_transient());
        assert!(!throttled.is_terminal());

        let forbidden = Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        }));
        assert!(!forbidden.is_transient());

        assert!(!Error::not_found("gone").is_transient());
    }

    /// Story: only connection-level client failures are retried
    ///
    /// A refused connection may succeed a moment later; a response that
    /// failed to deserialize will fail identically on every retry.
    #[test]
    fn story_transient_classification_for_client_errors() {
        let refused = Error::Kube(kube::Error::Service(Box::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ))));
        assert!(refused.is_transient());

        let garbled = Error::Kube(kube::Error::SerdeError(
            serde_json::from_str::<()>("{").unwrap_err(),
        ));
        assert!(!garbled.is_transient());
    }

    /// Story: error helpers accept both String and &str
    #[test]
    fn story_error_construction_ergonomics() {
        let session_id = "bg-9a3f";
        let err = Error::not_found(format!("session {} not found", session_id));
        assert!(err.to_string().contains("bg-9a3f"));

        let err = Error::validation("ttl must be between 10m and 24h");
        assert!(err.to_string().contains("ttl"));
    }
}
