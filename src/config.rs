//! Broker configuration

use std::time::Duration;

use crate::{Error, Result};

/// Configuration for the session broker and reaper.
///
/// Defaults give a 24h session window with a 10 minute floor, matching
/// the validity of the certificates the signer mints.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// TTL applied when a session request does not name one
    pub default_ttl: Duration,
    /// Minimum accepted session TTL
    pub min_ttl: Duration,
    /// Maximum accepted session TTL
    pub max_ttl: Duration,
    /// Interval between reaper sweeps
    pub reaper_interval: Duration,
    /// How long terminal session records are kept after expiry so
    /// that polls keep returning the same terminal answer
    pub retention: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(24 * 60 * 60),
            min_ttl: Duration::from_secs(10 * 60),
            max_ttl: Duration::from_secs(24 * 60 * 60),
            reaper_interval: Duration::from_secs(30),
            retention: Duration::from_secs(60 * 60),
        }
    }
}

impl BrokerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.min_ttl.is_zero() {
            return Err(Error::validation("min_ttl must be greater than zero"));
        }
        if self.min_ttl > self.max_ttl {
            return Err(Error::validation(format!(
                "min_ttl ({:?}) must not exceed max_ttl ({:?})",
                self.min_ttl, self.max_ttl
            )));
        }
        if self.default_ttl < self.min_ttl || self.default_ttl > self.max_ttl {
            return Err(Error::validation(format!(
                "default_ttl ({:?}) must be within [{:?}, {:?}]",
                self.default_ttl, self.min_ttl, self.max_ttl
            )));
        }
        if self.reaper_interval.is_zero() {
            return Err(Error::validation("reaper_interval must be greater than zero"));
        }
        Ok(())
    }

    /// Resolve and bounds-check a requested TTL
    pub fn resolve_ttl(&self, requested: Option<Duration>) -> Result<Duration> {
        let ttl = requested.unwrap_or(self.default_ttl);
        if ttl < self.min_ttl || ttl > self.max_ttl {
            return Err(Error::validation(format!(
                "ttl {:?} must be within [{:?}, {:?}]",
                ttl, self.min_ttl, self.max_ttl
            )));
        }
        Ok(ttl)
    }
}
