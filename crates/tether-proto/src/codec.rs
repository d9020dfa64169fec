//! CBOR encoding shared by requests, channel messages and persisted values.
//!
//! Every decode path checks [`MAX_MESSAGE_SIZE`] before the CBOR parser sees
//! a single byte.

use serde::{Serialize, de::DeserializeOwned};

use crate::errors::{ProtocolError, Result};

/// Largest encoded message accepted by [`decode`] (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Encode a value as CBOR.
///
/// # Errors
///
/// Returns [`ProtocolError::CborEncode`] if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    Ok(buf)
}

/// Decode a CBOR value.
///
/// # Errors
///
/// Returns [`ProtocolError::MessageTooLarge`] for oversized input and
/// [`ProtocolError::CborDecode`] if parsing fails.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge { size: bytes.len(), max: MAX_MESSAGE_SIZE });
    }

    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}
