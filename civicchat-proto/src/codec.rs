//! JSON text-frame encoding for the CivicChat event stream.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::events::{ClientEvent, ServerEvent};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Frame is larger than the accepted maximum.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
}

/// Upper bound on an accepted text frame: content limit plus envelope slack.
pub const MAX_FRAME_SIZE: usize = crate::message::MAX_CONTENT_SIZE + 16 * 1024;

fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|e| CodecError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: text.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    serde_json::from_str(text).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a client event into a text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the event cannot be serialized.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    encode(event)
}

/// Decodes a client event from a text frame.
///
/// # Errors
///
/// Returns `CodecError::FrameTooLarge` for oversized frames and
/// `CodecError::Serialization` for anything that is not a known event.
pub fn decode_client(text: &str) -> Result<ClientEvent, CodecError> {
    decode(text)
}

/// Encodes a server event into a text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the event cannot be serialized.
pub fn encode_server(event: &ServerEvent) -> Result<String, CodecError> {
    encode(event)
}

/// Decodes a server event from a text frame.
///
/// # Errors
///
/// Returns `CodecError::FrameTooLarge` for oversized frames and
/// `CodecError::Serialization` for anything that is not a known event.
pub fn decode_server(text: &str) -> Result<ServerEvent, CodecError> {
    decode(text)
}
