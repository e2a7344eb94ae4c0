//! Decoding of raw inbound frames.
//!
//! Clients send plain text or binary frames. The hub does not impose a
//! schema on them: a frame becomes an [`InboundMessage`] carrying the frame
//! kind and its body as text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of transport frame a message arrived in.
///
/// Serialized as the WebSocket opcode number (1 = text, 2 = binary), which is
/// what existing clients expect in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageKind {
    Text,
    Binary,
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Text => 1,
            MessageKind::Binary => 2,
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Text),
            2 => Ok(Self::Binary),
            other => Err(ProtocolError::UnknownMessageKind(other)),
        }
    }
}

/// A message received from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub body: String,
}

impl InboundMessage {
    /// Creates a message from a text frame.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            body: body.into(),
        }
    }

    /// Creates a message from a binary frame.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidUtf8` if the payload is not UTF-8,
    /// since the body is relayed as a JSON string.
    pub fn binary(data: Vec<u8>) -> Result<Self, ProtocolError> {
        let body = String::from_utf8(data).map_err(|e| ProtocolError::InvalidUtf8 {
            valid_up_to: e.utf8_error().valid_up_to(),
        })?;
        Ok(Self {
            kind: MessageKind::Binary,
            body,
        })
    }
}

/// Errors raised while encoding or decoding wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("binary frame is not valid UTF-8 (valid up to byte {valid_up_to})")]
    InvalidUtf8 { valid_up_to: usize },

    #[error("unknown message type: {0}")]
    UnknownMessageKind(u8),

    #[error("failed to encode event: {0}")]
    Encode(String),

    #[error("failed to decode event: {0}")]
    Decode(String),
}

impl ProtocolError {
    /// Creates an encode error from any error type.
    pub fn encode<E: std::fmt::Display>(err: E) -> Self {
        Self::Encode(err.to_string())
    }

    /// Creates a decode error from any error type.
    pub fn decode<E: std::fmt::Display>(err: E) -> Self {
        Self::Decode(err.to_string())
    }
}
