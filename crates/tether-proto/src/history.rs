//! Retained session history.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{PeerId, nonce::Nonce};

/// One retained message.
///
/// Entries are appended when a send asks for history retention and are
/// only ever removed (by `delete_data`), never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Addressee of a unicast; `None` for broadcasts
    pub receiver_id: Option<PeerId>,
    /// Seconds, taken from the nonce
    pub timestamp: u64,
    /// Opaque payload
    pub data: Bytes,
    /// Peer that sent the message
    pub sender_id: PeerId,
    /// Nonce of the sending request
    pub nonce: Nonce,
}

impl HistoryEntry {
    /// Whether this entry was produced by `(sender_id, nonce)`.
    pub fn is_from(&self, sender_id: &PeerId, nonce: &Nonce) -> bool {
        &self.sender_id == sender_id && &self.nonce == nonce
    }

    /// Whether `reader` may see this entry: broadcasts, and unicasts the
    /// reader sent or received.
    pub fn is_visible_to(&self, reader: &PeerId) -> bool {
        match &self.receiver_id {
            None => true,
            Some(receiver) => receiver == reader || &self.sender_id == reader,
        }
    }
}
