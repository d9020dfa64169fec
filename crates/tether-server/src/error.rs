//! Runtime errors.

use tether_core::ActorError;
use tether_proto::ProtocolError;
use thiserror::Error;

/// Errors surfaced by the relay runtime.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The actor failed to handle the request
    #[error("actor error: {0}")]
    Actor(#[from] ActorError),

    /// The request bytes did not decode
    #[error("malformed request: {0}")]
    Protocol(#[from] ProtocolError),

    /// The actor task is gone and no longer accepts requests
    #[error("actor mailbox closed")]
    MailboxClosed,

    /// The actor task dropped the request without replying
    #[error("actor dropped the reply")]
    ReplyDropped,

    /// The actor answered with a response of the wrong shape
    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),

    /// No free session key was found
    #[error("no free session key after {attempts} attempts")]
    KeySpaceExhausted {
        /// Keys tried
        attempts: usize,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RelayError {
    /// Returns true if re-issuing the request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Actor(err) => err.is_transient(),
            Self::MailboxClosed | Self::ReplyDropped | Self::KeySpaceExhausted { .. } => true,
            Self::Protocol(_) | Self::UnexpectedReply(_) | Self::Config(_) => false,
        }
    }
}
