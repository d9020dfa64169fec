//! Identifiers: peers, sessions and subscriptions.

use std::{
    fmt::{self, Write},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Identity of a peer.
///
/// Peers identify themselves by their public key; the relay never inspects
/// the key material, so the identity is an opaque non-empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer id.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::EmptyPeerId`] if `value` is empty.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(ProtocolError::EmptyPeerId);
        }
        Ok(Self(value))
    }

    /// Borrow the identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PeerId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PeerId> for String {
    fn from(value: PeerId) -> Self {
        value.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a session: a six letter code `AAAAAA`..`ZZZZZZ`.
///
/// The letters are the base-26 digits of the key, most significant first.
/// Parsing is case-insensitive; display is always upper case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey(u32);

impl SessionKey {
    /// Number of letters in a key.
    pub const LEN: usize = 6;

    /// Number of distinct keys (26^6).
    pub const SPACE: u32 = 26u32.pow(Self::LEN as u32);

    /// Build a key from its numeric value.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidSessionKey`] if `value >= SPACE`.
    pub fn from_u32(value: u32) -> Result<Self> {
        if value >= Self::SPACE {
            return Err(ProtocolError::InvalidSessionKey("value out of range"));
        }
        Ok(Self(value))
    }

    /// Map random bits onto the key space.
    pub fn from_entropy(bits: u64) -> Self {
        // SPACE fits in u32, so the remainder does too
        Self((bits % u64::from(Self::SPACE)) as u32)
    }

    /// Numeric value of the key.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl FromStr for SessionKey {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != Self::LEN {
            return Err(ProtocolError::InvalidSessionKey("expected six letters"));
        }

        let mut value = 0u32;
        for byte in s.bytes() {
            let letter = byte.to_ascii_uppercase();
            if !letter.is_ascii_uppercase() {
                return Err(ProtocolError::InvalidSessionKey("contains non-letter characters"));
            }
            value = value * 26 + u32::from(letter - b'A');
        }

        debug_assert!(value < Self::SPACE);
        Ok(Self(value))
    }
}

impl TryFrom<String> for SessionKey {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SessionKey> for String {
    fn from(value: SessionKey) -> Self {
        value.to_string()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut letters = [b'A'; Self::LEN];
        let mut rest = self.0;
        for slot in letters.iter_mut().rev() {
            *slot = b'A' + (rest % 26) as u8;
            rest /= 26;
        }
        for letter in letters {
            f.write_char(char::from(letter))?;
        }
        Ok(())
    }
}

/// Server-issued identifier of one subscription within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u32);

impl SubscriptionId {
    /// The id following this one, wrapping modulo 2^32.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
