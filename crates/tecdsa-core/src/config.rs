//! Registry configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default idle lifetime of a session
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(300);

/// Default number of early payloads a session may hold
pub const DEFAULT_MAX_QUEUED_MESSAGES: usize = 4;

/// Default upper bound on `triples_count` per session
pub const DEFAULT_MAX_TRIPLES_PER_SESSION: usize = 16;

/// Limits applied by the session registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Sessions idle longer than this are purged
    pub session_ttl: Duration,
    /// Early payloads queued per session before the session is aborted
    pub max_queued_messages: usize,
    /// Largest accepted `triples_count` (pairs) for one triples session
    pub max_triples_per_session: usize,
}

impl RegistryConfig {
    /// Create a validated configuration
    pub fn new(
        session_ttl: Duration,
        max_queued_messages: usize,
        max_triples_per_session: usize,
    ) -> Result<Self> {
        if session_ttl.is_zero() {
            return Err(Error::InvalidConfig("Session TTL must be positive".into()));
        }
        if max_queued_messages == 0 {
            return Err(Error::InvalidConfig(
                "At least one early message must be queueable".into(),
            ));
        }
        if max_triples_per_session == 0 {
            return Err(Error::InvalidConfig(
                "Triples limit must be at least 1".into(),
            ));
        }
        Ok(Self {
            session_ttl,
            max_queued_messages,
            max_triples_per_session,
        })
    }

    pub(crate) fn ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.session_ttl).unwrap_or_else(|_| chrono::Duration::days(365))
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            session_ttl: DEFAULT_SESSION_TTL,
            max_queued_messages: DEFAULT_MAX_QUEUED_MESSAGES,
            max_triples_per_session: DEFAULT_MAX_TRIPLES_PER_SESSION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(RegistryConfig::new(Duration::ZERO, 4, 16).is_err());
        assert!(RegistryConfig::new(Duration::from_secs(1), 0, 16).is_err());
        assert!(RegistryConfig::new(Duration::from_secs(1), 4, 0).is_err());

        let config = RegistryConfig::new(Duration::from_secs(5), 2, 3).unwrap();
        assert_eq!(config.ttl(), chrono::Duration::seconds(5));
    }
}
