//! JSON encoding for [`ChatMessage`] frames.
//!
//! Messages travel as WebSocket text frames holding a JSON object, e.g.
//! `{"status":"chatting","text":"hi"}`.

use crate::message::ChatMessage;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encodes a [`ChatMessage`] as a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if the message cannot be serialized.
pub fn encode(msg: &ChatMessage) -> Result<String, CodecError> {
    Ok(serde_json::to_string(msg)?)
}

/// Decodes a [`ChatMessage`] from a JSON string.
///
/// A missing `text` field decodes as the empty string; unknown fields are
/// ignored.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if the input is not a JSON object with a
/// string `status`.
pub fn decode(text: &str) -> Result<ChatMessage, CodecError> {
    Ok(serde_json::from_str(text)?)
}
