//! Background expiry of overdue sessions
//!
//! The reaper is the guarantee that a session's validity window is
//! enforced even if nobody ever polls it again: it marks overdue
//! sessions Expired, pulls their endpoints from the registry, deletes
//! their CSR and approval objects, and eventually drops terminal
//! records that are past retention.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::csr::CsrTracker;
use crate::registry::SessionRegistry;
use crate::retry::{retry_with_backoff, RetryConfig};

use super::SessionBroker;

/// Periodic sweeper over a broker's session records.
pub struct Reaper {
    broker: Arc<SessionBroker>,
    registry: Arc<SessionRegistry>,
    tracker: CsrTracker,
    retry: RetryConfig,
}

impl Reaper {
    /// Create a reaper over the given broker and registry
    pub fn new(broker: Arc<SessionBroker>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            broker,
            registry,
            tracker: CsrTracker::new(),
            retry: RetryConfig::default(),
        }
    }

    /// Spawn the sweep loop on the broker's configured interval.
    ///
    /// The task runs until the handle is aborted or the runtime shuts
    /// down.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.broker.config().reaper_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    /// Run one sweep: expire overdue sessions, unregister and clean
    /// them up, and drop records past retention. Returns the number of
    /// sessions expired by this sweep.
    ///
    /// Cleanup against the management cluster is retried with backoff
    /// and failures are logged, not propagated; the session is already
    /// Expired either way, and the next sweep will find orphaned CSRs
    /// under the same name only if a new session recreates them.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let expired = self.broker.collect_expired(now);
        let count = expired.len();

        for session in expired {
            self.registry.unregister(&session.id);

            let api = session.api.clone();
            let namespace = session.hcp_namespace.clone();
            let csr_name = session.csr_name.clone();
            let tracker = self.tracker.clone();
            let result = retry_with_backoff(&self.retry, "cleanup_expired_session", || {
                let api = api.clone();
                let namespace = namespace.clone();
                let csr_name = csr_name.clone();
                let tracker = tracker.clone();
                async move { tracker.remove(api.as_ref(), &namespace, &csr_name).await }
            })
            .await;

            match result {
                Ok(()) => info!(session = %session.id, "expired session cleaned up"),
                Err(e) => {
                    warn!(session = %session.id, error = %e, "failed to clean up expired session")
                }
            }
        }

        let dropped = self.broker.drop_stale(now);
        if dropped > 0 {
            debug!(dropped, "dropped stale session records");
        }

        count
    }
}
