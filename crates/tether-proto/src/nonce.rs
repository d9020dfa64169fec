//! Request nonces.
//!
//! A nonce is an opaque token whose second `_`-delimited segment is the
//! request timestamp in seconds. Signed requests use the form `<id>_<ts>`,
//! where both segments are unsigned integers; that pair is what the replay
//! guard remembers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// How far into the future a request timestamp may lie, in seconds.
pub const MAX_CLOCK_SKEW_SECS: u64 = 10;

/// How old a request timestamp may be, in seconds.
pub const MAX_REQUEST_AGE_SECS: u64 = 5 * 60;

/// A validated request nonce.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Nonce {
    raw: String,
    timestamp: u64,
}

impl Nonce {
    /// Parse a nonce token.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingTimestamp`] if there is no second
    /// segment and [`ProtocolError::InvalidTimestamp`] if it is not a `u64`.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let segment = raw.split('_').nth(1).ok_or(ProtocolError::MissingTimestamp)?;
        let timestamp = segment.parse::<u64>().map_err(|_| ProtocolError::InvalidTimestamp)?;
        Ok(Self { raw, timestamp })
    }

    /// Build the canonical `<id>_<timestamp>` nonce of a signed request.
    pub fn from_record(record: NonceRecord) -> Self {
        Self { raw: format!("{}_{}", record.id, record.timestamp), timestamp: record.timestamp }
    }

    /// Timestamp in seconds carried by the nonce.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// The token as received.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The `(id, timestamp)` pair, if the first segment is a `u64`.
    pub fn record(&self) -> Option<NonceRecord> {
        let id = self.raw.split('_').next()?.parse::<u64>().ok()?;
        Some(NonceRecord { id, timestamp: self.timestamp })
    }

    /// Whether the timestamp is acceptable for a request arriving at
    /// `now_secs`: at most [`MAX_CLOCK_SKEW_SECS`] ahead and strictly less
    /// than [`MAX_REQUEST_AGE_SECS`] old.
    pub fn is_fresh(&self, now_secs: u64) -> bool {
        self.timestamp < now_secs.saturating_add(MAX_CLOCK_SKEW_SECS)
            && self.timestamp > now_secs.saturating_sub(MAX_REQUEST_AGE_SECS)
    }
}

impl TryFrom<String> for Nonce {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<Nonce> for String {
    fn from(value: Nonce) -> Self {
        value.raw
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// An `(id, timestamp)` pair remembered by a peer's replay guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonceRecord {
    /// Request id chosen by the peer
    pub id: u64,
    /// Request timestamp in seconds
    pub timestamp: u64,
}
