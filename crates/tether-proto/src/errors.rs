//! Error types for the tether wire format.
//!
//! All errors are structured, testable, and carry enough context to explain
//! why an input was rejected without echoing the input back.

use thiserror::Error;

/// Protocol-level errors raised while parsing or encoding wire values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    // Nonce parsing errors
    /// Nonce has no second `_`-delimited segment
    #[error("nonce has no timestamp segment")]
    MissingTimestamp,

    /// Second nonce segment is not an unsigned integer
    #[error("nonce timestamp segment is not an unsigned integer")]
    InvalidTimestamp,

    // Identifier errors
    /// Peer identifiers must be non-empty
    #[error("peer id is empty")]
    EmptyPeerId,

    /// Session key is not a valid six letter code
    #[error("invalid session key: {0}")]
    InvalidSessionKey(&'static str),

    // CBOR errors (wrapped for testability)
    /// Failed to encode data as CBOR
    #[error("failed to encode CBOR: {0}")]
    CborEncode(String),

    /// Failed to decode CBOR data
    #[error("failed to decode CBOR: {0}")]
    CborDecode(String),

    /// Message exceeds maximum allowed size
    #[error("message too large: {size} bytes exceeds maximum {max}")]
    MessageTooLarge {
        /// Actual message size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },
}

/// Convenient Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
