//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding channel messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The frame was not a JSON message envelope
    #[error("Malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The envelope carried a tag this client does not handle
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// The tag was known but its payload did not match the expected shape
    #[error("Invalid payload for {tag}: {source}")]
    InvalidPayload {
        tag: String,
        #[source]
        source: serde_json::Error,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Whether this error only means the message is addressed to someone else
    pub fn is_unknown_tag(&self) -> bool {
        matches!(self, ProtocolError::UnknownMessageType(_))
    }
}
