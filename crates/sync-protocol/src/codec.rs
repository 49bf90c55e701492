//! Codec for encoding and decoding broadcast messages.
//!
//! The wire format is one UTF-8 JSON object per data-channel packet. Decoding
//! is strict about the envelope (must be an object with a known `type`) and
//! lenient about optional fields, so older peers keep interoperating.

use crate::message::BroadcastMessage;
use bytes::Bytes;
use serde_json::Value;

/// Every `type` value this protocol understands.
pub const KNOWN_TYPES: [&str; 6] = [
    "peer_hello",
    "mic_state",
    "mic_state_req",
    "screen_share_claim",
    "screen_share_release",
    "chat",
];

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Payload is not valid UTF-8
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,

    /// Payload is not a JSON document
    #[error("Malformed JSON: {0}")]
    Malformed(String),

    /// JSON document is not an object
    #[error("Payload is not a JSON object")]
    NotAnObject,

    /// Object has no string `type` field
    #[error("Missing message type")]
    MissingType,

    /// `type` is not one of the known message types
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// Known type but required fields are missing or mistyped
    #[error("Invalid {message_type} fields: {reason}")]
    InvalidFields {
        message_type: String,
        reason: String,
    },

    /// Serialization failed
    #[error("Encode failed: {0}")]
    Encode(String),
}

impl CodecError {
    /// Bounded label for drop metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            CodecError::InvalidUtf8 | CodecError::Malformed(_) | CodecError::NotAnObject => {
                "malformed"
            }
            CodecError::MissingType => "missing_type",
            CodecError::UnknownType(_) => "unknown_type",
            CodecError::InvalidFields { .. } => "invalid_fields",
            CodecError::Encode(_) => "encode",
        }
    }
}

/// Encode a broadcast message to bytes
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn encode(message: &BroadcastMessage) -> Result<Bytes, CodecError> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a broadcast message from bytes
///
/// # Errors
///
/// Returns an error if the payload is not a JSON object with a known `type`
/// and valid fields for that type
pub fn decode(payload: &[u8]) -> Result<BroadcastMessage, CodecError> {
    let text = std::str::from_utf8(payload).map_err(|_| CodecError::InvalidUtf8)?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let message_type = match &value {
        Value::Object(map) => match map.get("type") {
            Some(Value::String(t)) => t.clone(),
            _ => return Err(CodecError::MissingType),
        },
        _ => return Err(CodecError::NotAnObject),
    };

    if !KNOWN_TYPES.contains(&message_type.as_str()) {
        return Err(CodecError::UnknownType(message_type));
    }

    serde_json::from_value(value).map_err(|e| CodecError::InvalidFields {
        message_type,
        reason: e.to_string(),
    })
}
