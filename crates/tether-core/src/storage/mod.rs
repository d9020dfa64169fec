//! Persistent storage abstraction.
//!
//! Each actor instance owns a [`Scope`] and only ever touches keys inside it.
//! Within a scope the store provides:
//!
//! - Atomic multi-key `get` and `put` (one round trip per operation)
//! - A single pending wake alarm, written in the same `put` as the state it
//!   guards; setting it overwrites any previous one
//! - `delete_all` to reclaim the scope, alarm included
//!
//! Values are opaque bytes to the backend. Actors encode them with CBOR via
//! [`encode_value`] / [`decode_value`].

mod memory;

use std::fmt;

pub use memory::MemoryStorage;
use serde::{Serialize, de::DeserializeOwned};
use tether_proto::{PeerId, SessionKey};
use thiserror::Error;

use crate::time::Timestamp;

/// Persisted key names.
pub mod keys {
    /// Session: ordered list of privileged peers
    pub const PRIVILEGED_PEERS: &str = "privileged_peers";
    /// Session: ordered list of history entries
    pub const MESSAGE_HISTORY: &str = "message_history";
    /// Session: last issued subscription id
    pub const SUBSCRIPTION_COUNTER: &str = "subscription_counter";
    /// Replay guard: list of (id, timestamp) pairs
    pub const NONCE_LIST: &str = "nonce_list";
}

/// The slice of the store owned by one actor instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// A session actor
    Session(SessionKey),
    /// A peer's replay guard actor
    Guard(PeerId),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session(key) => write!(f, "session/{key}"),
            Self::Guard(peer) => write!(f, "guard/{peer}"),
        }
    }
}

/// Errors from storage operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The backend failed; the operation was not applied
    #[error("storage backend failure: {0}")]
    Backend(String),

    /// A stored value could not be decoded
    #[error("corrupt value under {key}: {reason}")]
    Corrupt {
        /// Key holding the value
        key: &'static str,
        /// Decoder message
        reason: String,
    },

    /// A value could not be encoded
    #[error("failed to encode value for {key}: {reason}")]
    Encode {
        /// Key the value was destined for
        key: &'static str,
        /// Encoder message
        reason: String,
    },
}

/// Trait for per-actor persistent storage.
///
/// Implementations must apply each `put` and `delete_all` atomically: either
/// every entry (and the alarm) is written or nothing is. Only the owning
/// actor touches a scope, so no further isolation is required.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Read several keys at once. The result has one slot per key, in order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Backend` if the read fails.
    fn get(&self, scope: &Scope, keys: &[&'static str]) -> Result<Vec<Option<Vec<u8>>>, StorageError>;

    /// Write several keys atomically, replacing the wake alarm when `alarm`
    /// is set.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Backend` if the write fails; nothing is written
    /// and the previous alarm stays in place.
    fn put(
        &self,
        scope: &Scope,
        entries: Vec<(&'static str, Vec<u8>)>,
        alarm: Option<Timestamp>,
    ) -> Result<(), StorageError>;

    /// Remove every key in the scope and cancel its alarm.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Backend` if the delete fails; nothing is removed.
    fn delete_all(&self, scope: &Scope) -> Result<(), StorageError>;

    /// The pending wake alarm, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Backend` if the read fails.
    fn alarm(&self, scope: &Scope) -> Result<Option<Timestamp>, StorageError>;
}

/// Encode a value for `key`.
///
/// # Errors
///
/// Returns `StorageError::Encode` if serialization fails.
pub fn encode_value<T: Serialize>(key: &'static str, value: &T) -> Result<Vec<u8>, StorageError> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| StorageError::Encode { key, reason: e.to_string() })?;
    Ok(buf)
}

/// Decode the value read for `key`, if present.
///
/// # Errors
///
/// Returns `StorageError::Corrupt` if the bytes do not decode.
pub fn decode_value<T: DeserializeOwned>(
    key: &'static str,
    bytes: Option<Vec<u8>>,
) -> Result<Option<T>, StorageError> {
    bytes
        .map(|bytes| {
            ciborium::de::from_reader(bytes.as_slice())
                .map_err(|e| StorageError::Corrupt { key, reason: e.to_string() })
        })
        .transpose()
}
