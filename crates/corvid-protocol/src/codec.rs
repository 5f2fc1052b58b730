//! Newline-delimited JSON framing.
//!
//! One message per line. Frames above [`MAX_FRAME_SIZE`] never reach
//! the JSON parser; the pumps log and drop them. The cap bounds parsing
//! only - the line readers around it buffer a frame before this check
//! sees it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum accepted frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1_048_576;

/// Errors that can occur while framing or parsing messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame was not valid JSON for the expected message type
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame exceeded the size cap
    #[error("Frame of {len} bytes exceeds maximum of {MAX_FRAME_SIZE}")]
    Oversized { len: usize },

    /// Frame contained only whitespace
    #[error("Empty frame")]
    EmptyFrame,
}

/// Encodes a message as a single JSON line, newline-terminated.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decodes one line into a message.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    if line.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::Oversized { len: line.len() });
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    Ok(serde_json::from_str(trimmed)?)
}
