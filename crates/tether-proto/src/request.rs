//! Requests routed to session and replay guard actors.
//!
//! Both unions are closed and internally tagged by `message_type`, so the
//! actors dispatch with an exhaustive `match` and unknown kinds are rejected
//! by the decoder before reaching them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    PeerId, SubscriptionId, codec,
    errors::Result,
    history::HistoryEntry,
    nonce::{Nonce, NonceRecord},
};

/// Operations understood by a session actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum SessionRequest {
    /// Report whether the session exists
    CheckExists,
    /// Create the session with a single privileged peer
    Initialise {
        /// First privileged peer
        initial_peer_id: PeerId,
    },
    /// Open a live subscription
    Subscribe {
        /// Identity the subscription receives messages for
        subscriber_id: PeerId,
    },
    /// Ask every channel registered under `subscription_id` to close
    Unsubscribe {
        /// Server-issued subscription id
        subscription_id: SubscriptionId,
    },
    /// Grant privilege to another peer
    AddPrivilegedPeer {
        /// Peer performing the grant (must be privileged)
        adder_id: PeerId,
        /// Peer being granted privilege
        added_id: PeerId,
    },
    /// Delete the session
    Delete {
        /// Deleting peer; `None` for an administrative delete
        deleter_id: Option<PeerId>,
    },
    /// Send to every privileged subscriber
    BroadcastData {
        /// Opaque payload
        data: Bytes,
        /// Sending peer
        sender_id: PeerId,
        /// Nonce of the signed request
        nonce: Nonce,
        /// Retain the message in history
        write_history: bool,
    },
    /// Send to the subscribers of one peer
    UnicastData {
        /// Opaque payload
        data: Bytes,
        /// Sending peer
        sender_id: PeerId,
        /// Addressee
        receiver_id: PeerId,
        /// Nonce of the signed request
        nonce: Nonce,
        /// Retain the message in history
        write_history: bool,
        /// Grant the addressee privilege before delivery
        make_receiver_privileged: bool,
    },
    /// Remove retained messages produced by one request
    DeleteData {
        /// Peer requesting the deletion (must be privileged)
        deleter_id: PeerId,
        /// Sender of the retained message
        data_sender_id: PeerId,
        /// Nonce of the retained message
        data_nonce: Nonce,
    },
    /// Read retained messages
    GetHistory {
        /// Reading peer (must be privileged)
        reader_id: PeerId,
        /// Oldest timestamp to include, in seconds
        from_timestamp: u64,
    },
}

impl SessionRequest {
    /// Short name of the operation, for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CheckExists => "check_exists",
            Self::Initialise { .. } => "initialise",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::AddPrivilegedPeer { .. } => "add_privileged_peer",
            Self::Delete { .. } => "delete",
            Self::BroadcastData { .. } => "broadcast_data",
            Self::UnicastData { .. } => "unicast_data",
            Self::DeleteData { .. } => "delete_data",
            Self::GetHistory { .. } => "get_history",
        }
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
    /// Returns an error for oversized, malformed or unknown requests.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        codec::decode(bytes)
    }
}

/// Operations understood by a replay guard actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum GuardRequest {
    /// Record the pair, reporting whether it was already used
    CheckNonceIsUsed(NonceRecord),
}

impl GuardRequest {
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
    /// Returns an error for oversized, malformed or unknown requests.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        codec::decode(bytes)
    }
}

/// Structured result of a non-upgrade session request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "return_type", content = "return_data", rename_all = "snake_case")]
pub enum SessionResponse {
    /// Boolean outcome
    Bool(bool),
    /// Subscription id; the channel, if any, travels out-of-band
    Subscribed {
        /// Server-issued subscription id
        subscription_id: SubscriptionId,
    },
    /// Retained messages
    History(Vec<HistoryEntry>),
    /// No result
    Ack,
}

impl SessionResponse {
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
    /// Returns an error for oversized or malformed responses.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        codec::decode(bytes)
    }
}
