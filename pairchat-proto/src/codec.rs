//! Text-frame codec for channel events.
//!
//! Frames are JSON text. Decoding enforces [`MAX_FRAME_SIZE`] before parsing
//! so that an oversized frame is rejected without allocating its structure.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Maximum accepted frame size in bytes (128 KB).
///
/// Sized to hold a [`MAX_CONTENT_SIZE`](crate::message::MAX_CONTENT_SIZE)
/// message plus its envelope and reader list.
pub const MAX_FRAME_SIZE: usize = 128 * 1024;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Frame exceeds [`MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
}

/// Encodes an event into a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the event cannot be serialized.
pub fn encode<T: Serialize>(event: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Decodes an event from a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::FrameTooLarge`] for oversized frames, or
/// [`CodecError::Serialization`] if the text is not a known event.
pub fn decode<T: DeserializeOwned>(frame: &str) -> Result<T, CodecError> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(serde_json::from_str(frame)?)
}
