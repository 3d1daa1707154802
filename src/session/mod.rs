//! Breakglass session lifecycle
//!
//! A session is created in Pending, polled with `get_session`, and ends
//! in exactly one of Ready, Failed, or Expired. Creation never waits for
//! the external signer; callers poll. Once a terminal state is reached
//! it is stable: every later poll gives the same answer, and a Ready
//! session never regresses to Pending.

mod kubeconfig;
mod reaper;

pub use reaper::Reaper;

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::BrokerConfig;
use crate::csr::{CertificateRequest, CsrPhase, CsrTracker, Subject};
use crate::locator::{ControlPlaneApi, ControlPlaneApiFactory, Locator, TargetReference};
use crate::{Error, Result};

/// Parameters for a new breakglass session.
#[derive(Clone, Debug)]
pub struct SessionRequest {
    /// Opaque target reference (`<namespace>` or `<namespace>/<name>`)
    pub target: String,
    /// Operator identity, minted into the certificate common name
    pub requested_by: String,
    /// Access group, minted into the certificate organization
    pub access_group: String,
    /// Requested validity window; the broker default applies when None
    pub ttl: Option<Duration>,
}

/// Lifecycle state of a session.
#[derive(Clone, Debug)]
enum SessionState {
    Pending,
    Ready { kubeconfig: String },
    Failed { reason: String },
    Expired,
}

/// Outcome of polling a session that has not failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionPoll {
    /// Credentials are not ready yet; poll again later
    Provisioning,
    /// Session is ready; carries the rendered kubeconfig
    Ready(String),
}

struct SessionRecord {
    target: TargetReference,
    hcp_namespace: String,
    csr_name: String,
    digest: String,
    key_pem: String,
    api: Arc<dyn ControlPlaneApi>,
    expires_at: DateTime<Utc>,
    state: SessionState,
}

/// Cleanup handle for a session the reaper just expired.
pub(crate) struct ExpiredSession {
    pub(crate) id: String,
    pub(crate) hcp_namespace: String,
    pub(crate) csr_name: String,
    pub(crate) api: Arc<dyn ControlPlaneApi>,
}

/// The session state machine.
///
/// Holds all live session records in memory; the management cluster
/// holds the CSR state. Safe to share behind an `Arc` and poll from
/// many tasks concurrently.
pub struct SessionBroker {
    config: BrokerConfig,
    factory: Arc<dyn ControlPlaneApiFactory>,
    tracker: CsrTracker,
    sessions: DashMap<String, SessionRecord>,
}

impl SessionBroker {
    /// Create a broker with the given configuration and client factory
    pub fn new(config: BrokerConfig, factory: Arc<dyn ControlPlaneApiFactory>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            factory,
            tracker: CsrTracker::new(),
            sessions: DashMap::new(),
        })
    }

    /// Broker configuration
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Create a session and return its ID.
    ///
    /// Resolves the target (a namespace with zero or several
    /// HostedControlPlanes fails here, loudly), generates key material,
    /// and submits the certificate request. Returns as soon as the CSR
    /// and approval exist; approval and issuance are observed later via
    /// [`get_session`](Self::get_session).
    pub async fn create_session(&self, request: SessionRequest) -> Result<String> {
        if request.requested_by.trim().is_empty() {
            return Err(Error::validation("requested_by must not be empty"));
        }
        if request.access_group.trim().is_empty() {
            return Err(Error::validation("access_group must not be empty"));
        }

        let target = TargetReference::parse(&request.target)?;
        let ttl = self.config.resolve_ttl(request.ttl)?;

        let api = self.factory.connect(&target).await?;
        let locator = Locator::new(api.clone());
        let hcp = locator.hosted_control_plane(&target).await?;

        let subject = Subject::for_operator(&request.requested_by, &request.access_group);
        let cert_request = CertificateRequest::generate(subject)?;
        let csr_name = self
            .tracker
            .request_certificate(api.as_ref(), target.namespace(), &cert_request, ttl)
            .await?;

        let id = self.new_session_id()?;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| Error::validation(format!("ttl out of range: {}", e)))?;

        let record = SessionRecord {
            hcp_namespace: target.namespace().to_string(),
            target,
            csr_name,
            digest: cert_request.digest().to_string(),
            key_pem: cert_request.private_key_pem().to_string(),
            api,
            expires_at,
            state: SessionState::Pending,
        };

        info!(
            session = %id,
            target = %request.target,
            requested_by = %request.requested_by,
            expires_at = %record.expires_at,
            control_plane = %hcp.metadata.name.as_deref().unwrap_or_default(),
            "created session"
        );
        self.sessions.insert(id.clone(), record);

        Ok(id)
    }

    /// Poll a session.
    ///
    /// Unknown IDs are `NotFound`. Terminal states are stable: Failed
    /// polls as `Denied`, Expired as `Expired`, Ready returns the same
    /// kubeconfig every time without touching the management cluster.
    /// A Pending or Ready session past its window transitions to
    /// Expired right here, reaper or no reaper. A Pending session
    /// checks its CSR; transient API failures surface as errors and
    /// leave the state untouched.
    pub async fn get_session(&self, session_id: &str) -> Result<SessionPoll> {
        // Snapshot what the async work needs; the shard lock must not
        // be held across an await. The validity window is enforced here
        // too, so an overdue session expires on poll even before the
        // reaper's next sweep, a Ready one included.
        let snapshot = {
            let record = self.sessions.get(session_id).ok_or_else(|| {
                Error::not_found(format!("session {}", session_id))
            })?;
            let overdue = Utc::now() >= record.expires_at
                && matches!(
                    record.state,
                    SessionState::Pending | SessionState::Ready { .. }
                );
            if overdue {
                None
            } else {
                match &record.state {
                    SessionState::Ready { kubeconfig } => {
                        return Ok(SessionPoll::Ready(kubeconfig.clone()))
                    }
                    SessionState::Failed { reason } => return Err(Error::denied(reason.clone())),
                    SessionState::Expired => {
                        return Err(Error::expired(format!("session {} expired", session_id)))
                    }
                    SessionState::Pending => Some((
                        record.api.clone(),
                        record.target.clone(),
                        record.csr_name.clone(),
                        record.digest.clone(),
                        record.key_pem.clone(),
                    )),
                }
            }
        };
        let Some((api, target, csr_name, digest, key_pem)) = snapshot else {
            self.mark_expired(session_id);
            return Err(Error::expired(format!("session {} expired", session_id)));
        };

        match self.tracker.phase(api.as_ref(), &csr_name, &digest).await? {
            CsrPhase::Pending | CsrPhase::Approved => Ok(SessionPoll::Provisioning),
            CsrPhase::Denied(reason) => {
                warn!(session = %session_id, reason = %reason, "certificate request denied");
                if let Some(mut entry) = self.sessions.get_mut(session_id) {
                    if matches!(entry.state, SessionState::Pending) {
                        entry.state = SessionState::Failed {
                            reason: reason.clone(),
                        };
                    }
                }
                Err(Error::denied(reason))
            }
            CsrPhase::Issued(cert) => {
                self.finalize(session_id, &api, &target, &cert, &key_pem)
                    .await
            }
        }
    }

    /// End a session explicitly, removing its record and best-effort
    /// deleting its CSR and approval. Unknown IDs are `NotFound`.
    pub async fn end_session(&self, session_id: &str) -> Result<()> {
        let (_, record) = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| Error::not_found(format!("session {}", session_id)))?;

        if let Err(e) = self
            .tracker
            .remove(record.api.as_ref(), &record.hcp_namespace, &record.csr_name)
            .await
        {
            warn!(session = %session_id, error = %e, "cleanup failed while ending session");
        }
        info!(session = %session_id, "ended session");
        Ok(())
    }

    /// Transition all overdue sessions to Expired and hand back what the
    /// reaper needs to clean them up. No lock is held across an await;
    /// this method does no I/O.
    pub(crate) fn collect_expired(&self, now: DateTime<Utc>) -> Vec<ExpiredSession> {
        let mut expired = Vec::new();
        for mut entry in self.sessions.iter_mut() {
            if now < entry.expires_at {
                continue;
            }
            if matches!(
                entry.state,
                SessionState::Pending | SessionState::Ready { .. }
            ) {
                entry.state = SessionState::Expired;
                expired.push(ExpiredSession {
                    id: entry.key().clone(),
                    hcp_namespace: entry.hcp_namespace.clone(),
                    csr_name: entry.csr_name.clone(),
                    api: entry.api.clone(),
                });
            }
        }
        expired
    }

    /// Drop terminal records whose retention window has passed.
    pub(crate) fn drop_stale(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let before = self.sessions.len();
        self.sessions.retain(|_, record| {
            let terminal = matches!(
                record.state,
                SessionState::Failed { .. } | SessionState::Expired
            );
            !(terminal && now >= record.expires_at + retention)
        });
        before - self.sessions.len()
    }

    /// Number of session records currently held
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True if no session records are held
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    async fn finalize(
        &self,
        session_id: &str,
        api: &Arc<dyn ControlPlaneApi>,
        target: &TargetReference,
        cert: &[u8],
        key_pem: &str,
    ) -> Result<SessionPoll> {
        kubeconfig::check_certificate_validity(cert)?;

        let locator = Locator::new(api.clone());
        let hcp = locator.hosted_control_plane(target).await?;
        if !hcp.is_available() {
            return Ok(SessionPoll::Provisioning);
        }

        let (cluster_ref, cluster) = locator.hosted_cluster(&hcp).await?;
        let rendered = kubeconfig::render(
            &cluster_ref.name,
            &cluster.spec.server_url(),
            cluster.spec.ca_bundle.as_deref(),
            cert,
            key_pem,
        )?;

        // Re-acquire the record; a concurrent terminal transition wins.
        let mut entry = self.sessions.get_mut(session_id).ok_or_else(|| {
            Error::not_found(format!("session {}", session_id))
        })?;
        match &entry.state {
            SessionState::Pending => {
                entry.state = SessionState::Ready {
                    kubeconfig: rendered.clone(),
                };
                info!(session = %session_id, cluster = %cluster_ref, "session ready");
                Ok(SessionPoll::Ready(rendered))
            }
            SessionState::Ready { kubeconfig } => Ok(SessionPoll::Ready(kubeconfig.clone())),
            SessionState::Failed { reason } => Err(Error::denied(reason.clone())),
            SessionState::Expired => {
                Err(Error::expired(format!("session {} expired", session_id)))
            }
        }
    }

    fn mark_expired(&self, session_id: &str) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            if matches!(
                entry.state,
                SessionState::Pending | SessionState::Ready { .. }
            ) {
                entry.state = SessionState::Expired;
                info!(session = %session_id, "session expired");
            }
        }
    }

    /// Generate a fresh session ID: `bg-` plus 16 random bytes as
    /// lowercase hex, which keeps it usable in URLs and object names.
    /// Collisions are re-rolled so an ID is never reused while its
    /// record exists.
    fn new_session_id(&self) -> Result<String> {
        loop {
            let mut bytes = [0u8; 16];
            aws_lc_rs::rand::fill(&mut bytes)
                .map_err(|_| Error::pki("failed to generate session id"))?;

            let mut id = String::with_capacity(3 + bytes.len() * 2);
            id.push_str("bg-");
            for byte in &bytes {
                // Writing to a String is infallible.
                let _ = write!(id, "{:02x}", byte);
            }

            if !self.sessions.contains_key(&id) {
                return Ok(id);
            }
        }
    }
}
