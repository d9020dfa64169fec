//! # Tether Protocol: Wire Types
//!
//! Types exchanged between the request dispatcher, the session and replay
//! guard actors, and subscribers.
//!
//! ## Encoding
//!
//! Requests, responses, channel messages and persisted values are CBOR.
//! Request unions are internally tagged by `message_type`; unknown kinds fail
//! to decode, so malformed input never reaches an actor.
//!
//! ## Opaque Payloads
//!
//! Message payloads are `Bytes` the relay stores and forwards without
//! inspection. Peers encrypt end-to-end; nothing here can read the content.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channel;
pub mod codec;
pub mod errors;
pub mod history;
pub mod ids;
pub mod nonce;
pub mod request;

pub use channel::{ChannelMessage, DataMessage};
pub use errors::{ProtocolError, Result};
pub use history::HistoryEntry;
pub use ids::{PeerId, SessionKey, SubscriptionId};
pub use nonce::{Nonce, NonceRecord};
pub use request::{GuardRequest, SessionRequest, SessionResponse};
