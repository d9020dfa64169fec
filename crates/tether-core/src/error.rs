//! Error types for the tether actor core.
//!
//! Domain outcomes ("session not found", "peer not privileged") are not
//! errors: they surface as `false` or empty results so callers cannot tell
//! absence from refusal. What remains here are failures of the layers the
//! actors sit on.

use tether_proto::ProtocolError;
use thiserror::Error;

use crate::storage::StorageError;

/// Errors that can occur while an actor handles a request or an alarm.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActorError {
    /// Persistent storage failed; the operation was not applied
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A wire value could not be encoded or decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ActorError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Backend failures are transient: every operation is safe to re-issue.
    /// Corrupt stored values and protocol errors will fail the same way
    /// again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(StorageError::Backend(_)))
    }
}
