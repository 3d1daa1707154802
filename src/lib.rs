//! Glasskey - breakglass session broker for hosted Kubernetes control planes
//!
//! Glasskey grants operators short-lived, certificate-based access to
//! hosted control planes. A session is created against an opaque target
//! reference, credentials are minted asynchronously through the
//! management cluster's CSR flow, and callers poll until the session is
//! Ready and carries a kubeconfig. Sessions expire on their own; a
//! background reaper enforces the window and cleans up.
//!
//! # Architecture
//!
//! - Creation never blocks on approval: `create_session` submits the
//!   certificate request and returns a session ID immediately
//! - An external signer next to each hosted control plane approves and
//!   issues; the broker only observes CSR phase
//! - All state transitions are monotonic: Pending reaches at most one
//!   of Ready, Failed, or Expired, and terminal answers are stable
//!
//! # Modules
//!
//! - [`locator`] - Target resolution on the management cluster
//! - [`csr`] - Certificate request issuance and approval tracking
//! - [`session`] - Session state machine, kubeconfig synthesis, reaper
//! - [`registry`] - Session endpoint registry for the fronting proxy
//! - [`crd`] - Custom resource definitions the broker consumes
//! - [`config`] - Broker configuration
//! - [`retry`] - Backoff helper for best-effort cleanup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod csr;
pub mod error;
pub mod locator;
pub mod registry;
pub mod retry;
pub mod session;

pub use config::BrokerConfig;
pub use error::Error;
pub use registry::SessionRegistry;
pub use session::{Reaper, SessionBroker, SessionPoll, SessionRequest};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
