//! Actor timing configuration.

use std::time::Duration;

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Time after the last privileged activity before the session is wiped
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { idle_timeout: Duration::from_secs(20 * 60) }
    }
}

/// Replay guard configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    /// How long a nonce pair is remembered
    pub nonce_window: Duration,
    /// Delay after the latest insertion before stale pairs are pruned
    /// (should be > nonce_window)
    pub cleanup_delay: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self { nonce_window: Duration::from_secs(10 * 60), cleanup_delay: Duration::from_secs(11 * 60) }
    }
}
