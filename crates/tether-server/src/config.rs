//! Runtime configuration.
//!
//! ```toml
//! session_idle_timeout_secs = 1200
//! nonce_window_secs = 600
//! cleanup_delay_secs = 660
//! mailbox_capacity = 64
//! ```
//!
//! Every field is optional.

use std::time::Duration;

use serde::Deserialize;
use tether_core::{GuardConfig, SessionConfig};

use crate::error::RelayError;

/// Configuration of a [`crate::Relay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Session actor timing
    pub session: SessionConfig,
    /// Replay guard timing
    pub guard: GuardConfig,
    /// Queued requests per actor before callers wait
    pub mailbox_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            guard: GuardConfig::default(),
            mailbox_capacity: 64,
        }
    }
}

/// On-disk form; durations in whole seconds.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RelayConfigFile {
    session_idle_timeout_secs: u64,
    nonce_window_secs: u64,
    cleanup_delay_secs: u64,
    mailbox_capacity: usize,
}

impl Default for RelayConfigFile {
    fn default() -> Self {
        let defaults = RelayConfig::default();
        Self {
            session_idle_timeout_secs: defaults.session.idle_timeout.as_secs(),
            nonce_window_secs: defaults.guard.nonce_window.as_secs(),
            cleanup_delay_secs: defaults.guard.cleanup_delay.as_secs(),
            mailbox_capacity: defaults.mailbox_capacity,
        }
    }
}

impl RelayConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Config` for malformed TOML, unknown keys, a zero
    /// mailbox capacity, or a cleanup delay that does not exceed the nonce window.
    pub fn from_toml_str(source: &str) -> Result<Self, RelayError> {
        let file: RelayConfigFile =
            toml::from_str(source).map_err(|e| RelayError::Config(e.to_string()))?;

        let config = Self {
            session: SessionConfig { idle_timeout: Duration::from_secs(file.session_idle_timeout_secs) },
            guard: GuardConfig {
                nonce_window: Duration::from_secs(file.nonce_window_secs),
                cleanup_delay: Duration::from_secs(file.cleanup_delay_secs),
            },
            mailbox_capacity: file.mailbox_capacity,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the runtime relies on.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Config` describing the first violation.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.mailbox_capacity == 0 {
            return Err(RelayError::Config("mailbox_capacity must be non-zero".into()));
        }
        if self.guard.cleanup_delay <= self.guard.nonce_window {
            return Err(RelayError::Config("cleanup_delay_secs must exceed nonce_window_secs".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        assert_eq!(RelayConfig::from_toml_str("").expect("parse"), RelayConfig::default());
    }

    #[test]
    fn fields_override_defaults() {
        let config = RelayConfig::from_toml_str("session_idle_timeout_secs = 60\nmailbox_capacity = 8")
            .expect("parse");
        assert_eq!(config.session.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.mailbox_capacity, 8);
        assert_eq!(config.guard, GuardConfig::default());
    }

    #[test]
    fn invalid_documents_rejected() {
        for source in [
            "mailbox_capacity = 0",
            "nonce_window_secs = 700",
            "unknown = 1",
            "mailbox_capacity = \"many\"",
            "channel_capacity = 8",
        ] {
            assert!(matches!(RelayConfig::from_toml_str(source), Err(RelayError::Config(_))), "{source}");
        }
    }
}
