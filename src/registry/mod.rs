//! Session endpoint registry
//!
//! Maps live session IDs to the REST configuration a fronting proxy
//! needs to reach the hosted API server. The advertised endpoint URL is
//! a pure function of the session ID, so callers can compute it before,
//! during, or after registration and always get the same answer.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::{Error, Result};

/// A session known to the registry.
#[derive(Clone)]
pub struct RegisteredSession {
    /// Target the session was created for
    pub target: String,
    /// REST configuration for the hosted API server
    pub rest_config: kube::Config,
    /// When the session was registered
    pub registered_at: DateTime<Utc>,
}

/// Concurrency-safe session registry.
pub struct SessionRegistry {
    ingress_base_url: String,
    sessions: DashMap<String, RegisteredSession>,
}

impl SessionRegistry {
    /// Create a registry advertising endpoints under the given ingress
    /// base URL (e.g. `https://gate.example.com`).
    pub fn new(ingress_base_url: impl Into<String>) -> Result<Self> {
        let base = ingress_base_url.into();
        let base = base.trim_end_matches('/').to_string();
        if !base.starts_with("https://") && !base.starts_with("http://") {
            return Err(Error::validation(format!(
                "ingress base URL {:?} must be an http(s) URL",
                base
            )));
        }
        Ok(Self {
            ingress_base_url: base,
            sessions: DashMap::new(),
        })
    }

    /// Endpoint URL for a session ID.
    ///
    /// Pure: depends only on the registry's base URL and the ID, never
    /// on registration state.
    pub fn session_endpoint(&self, session_id: &str) -> String {
        format!("{}/sessions/{}/kas", self.ingress_base_url, session_id)
    }

    /// Register a session and return its endpoint URL.
    ///
    /// Idempotent: registering an already-registered ID leaves the
    /// stored entry untouched and returns the same endpoint.
    pub fn register(
        &self,
        session_id: &str,
        target: impl Into<String>,
        rest_config: kube::Config,
    ) -> String {
        let endpoint = self.session_endpoint(session_id);

        // Entry keeps the check-and-insert atomic: concurrent first
        // registrations cannot overwrite each other's entry.
        match self.sessions.entry(session_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                debug!(session = %session_id, "session already registered");
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(RegisteredSession {
                    target: target.into(),
                    rest_config,
                    registered_at: Utc::now(),
                });
                info!(session = %session_id, endpoint = %endpoint, "registered session");
            }
        }
        endpoint
    }

    /// Remove a session. Removing an unknown ID is a no-op.
    pub fn unregister(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            info!(session = %session_id, "unregistered session");
        }
    }

    /// REST configuration for a registered session, for the proxy layer
    pub fn rest_config(&self, session_id: &str) -> Option<kube::Config> {
        self.sessions.get(session_id).map(|s| s.rest_config.clone())
    }

    /// True if the session is currently registered
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True if no sessions are registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::new("https://gate.example.com").unwrap()
    }

    fn rest_config() -> kube::Config {
        kube::Config::new(http::Uri::from_static("https://api.hosted.example.com"))
    }

    #[test]
    fn test_base_url_is_validated_and_normalized() {
        assert!(SessionRegistry::new("gate.example.com").is_err());
        assert!(SessionRegistry::new("").is_err());

        let registry = SessionRegistry::new("https://gate.example.com/").unwrap();
        assert_eq!(
            registry.session_endpoint("bg-1"),
            "https://gate.example.com/sessions/bg-1/kas"
        );
    }

    /// Story: the endpoint URL never depends on registration state
    ///
    /// Callers compute the URL before the session is registered, hand it
    /// out, then register. All three observations agree.
    #[test]
    fn story_endpoint_is_pure_function_of_session_id() {
        let registry = registry();

        let before = registry.session_endpoint("bg-9a3f");
        let returned = registry.register("bg-9a3f", "ocm-prod-abc123", rest_config());
        let after = registry.session_endpoint("bg-9a3f");

        assert_eq!(before, returned);
        assert_eq!(returned, after);
        assert_eq!(after, "https://gate.example.com/sessions/bg-9a3f/kas");

        registry.unregister("bg-9a3f");
        assert_eq!(registry.session_endpoint("bg-9a3f"), before);
    }

    /// Story: double registration is harmless
    #[test]
    fn story_register_is_idempotent() {
        let registry = registry();

        let first = registry.register("bg-1", "ocm-prod-abc123", rest_config());
        let original_time = registry.sessions.get("bg-1").unwrap().registered_at;

        let second = registry.register("bg-1", "ocm-prod-abc123", rest_config());
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.sessions.get("bg-1").unwrap().registered_at,
            original_time
        );
    }

    /// Story: concurrent first registrations never clobber each other
    ///
    /// Many tasks race to register the same session ID. Exactly one
    /// entry survives, every caller gets the same endpoint, and the
    /// stored entry is never overwritten by a later arrival.
    #[tokio::test(flavor = "multi_thread")]
    async fn story_concurrent_registration_keeps_one_entry() {
        let registry = std::sync::Arc::new(registry());

        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.register("bg-1", format!("target-{}", i), rest_config())
            }));
        }

        let mut endpoints = Vec::new();
        for handle in handles {
            endpoints.push(handle.await.unwrap());
        }

        assert_eq!(registry.len(), 1);
        assert!(endpoints
            .iter()
            .all(|e| e == "https://gate.example.com/sessions/bg-1/kas"));

        // The winner's entry is intact and stable
        let target = registry.sessions.get("bg-1").unwrap().target.clone();
        registry.register("bg-1", "latecomer", rest_config());
        assert_eq!(registry.sessions.get("bg-1").unwrap().target, target);
        assert_ne!(target, "latecomer");
    }

    /// Story: unregistering an unknown session is a no-op
    #[test]
    fn story_unregister_unknown_session_is_noop() {
        let registry = registry();
        registry.unregister("bg-never-registered");
        assert!(registry.is_empty());

        registry.register("bg-1", "t", rest_config());
        registry.unregister("bg-1");
        registry.unregister("bg-1");
        assert!(registry.is_empty());
        assert!(registry.rest_config("bg-1").is_none());
    }

    #[test]
    fn test_rest_config_lookup() {
        let registry = registry();
        assert!(registry.rest_config("bg-1").is_none());

        registry.register("bg-1", "ocm-prod-abc123", rest_config());
        let config = registry.rest_config("bg-1").unwrap();
        assert_eq!(config.cluster_url.to_string(), "https://api.hosted.example.com/");
        assert!(registry.contains("bg-1"));
    }
}
