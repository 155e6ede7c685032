//! The relay's message record and its status vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Notice sent to both occupants once their public keys have been swapped.
pub const KEYS_EXCHANGED_NOTICE: &str =
    "The public keys of both have been exchanged, now you can start chatting";

/// Notice sent to the remaining occupant when the other one disconnects.
pub const PEER_LEFT_NOTICE: &str = "The other person has left";

/// The `status` field of a [`ChatMessage`].
///
/// Unknown wire values are kept verbatim in [`Status::Other`] so they can be
/// forwarded unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    /// Carries the peer's public key during the pairing handshake.
    ExchangePublicKey,
    /// Server-generated notice.
    System,
    /// Free-form chat between the two occupants.
    Chatting,
    /// The peer has disconnected.
    Left,
    /// Any status this crate does not know about.
    Other(String),
}

impl Status {
    /// Returns the wire representation of this status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ExchangePublicKey => "exchange_public_key",
            Self::System => "system",
            Self::Chatting => "chatting",
            Self::Left => "left",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for Status {
    fn from(s: String) -> Self {
        match s.as_str() {
            "exchange_public_key" => Self::ExchangePublicKey,
            "system" => Self::System,
            "chatting" => Self::Chatting,
            "left" => Self::Left,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for Status {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        match status {
            Status::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single relayed record.
///
/// `text` is opaque: a public key, a notice, or chat content depending on
/// `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// What kind of record this is.
    pub status: Status,
    /// Payload, forwarded verbatim.
    #[serde(default)]
    pub text: String,
}

impl ChatMessage {
    /// Creates a message with an arbitrary status.
    pub fn new(status: impl Into<Status>, text: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            text: text.into(),
        }
    }

    /// The peer's key, sent during the pairing handshake.
    pub fn exchange_public_key(key: impl Into<String>) -> Self {
        Self::new(Status::ExchangePublicKey, key)
    }

    /// A server notice.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Status::System, text)
    }

    /// A chat line.
    pub fn chatting(text: impl Into<String>) -> Self {
        Self::new(Status::Chatting, text)
    }

    /// A departure notice.
    pub fn left(text: impl Into<String>) -> Self {
        Self::new(Status::Left, text)
    }

    /// The fixed notice that follows a successful key exchange.
    #[must_use]
    pub fn keys_exchanged() -> Self {
        Self::system(KEYS_EXCHANGED_NOTICE)
    }

    /// The fixed notice sent when the other occupant leaves.
    #[must_use]
    pub fn peer_left() -> Self {
        Self::left(PEER_LEFT_NOTICE)
    }
}
