//! Messages pushed from a session to its subscription channels.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{PeerId, SubscriptionId, codec, errors::Result, nonce::Nonce};

/// Payload of a delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMessage {
    /// Opaque payload
    pub data: Bytes,
    /// Sending peer
    pub sender_id: PeerId,
    /// Nonce of the sending request
    pub nonce: Nonce,
}

/// Messages a session pushes over a subscription channel.
///
/// `SubscriptionId` and `Close` are control plane; `Data` is data plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message_type", content = "message_content", rename_all = "snake_case")]
pub enum ChannelMessage {
    /// First message on every channel: the id it was registered under
    SubscriptionId(SubscriptionId),
    /// The subscriber should close the channel
    Close,
    /// A delivered message
    Data(DataMessage),
}

impl ChannelMessage {
    /// Whether this is a control-plane message.
    pub const fn is_control(&self) -> bool {
        matches!(self, Self::SubscriptionId(_) | Self::Close)
    }

    /// Encode as CBOR.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ProtocolError::CborEncode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        codec::encode(self)
    }

    /// Decode from CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error for oversized or malformed messages.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        codec::decode(bytes)
    }
}
