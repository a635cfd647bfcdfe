//! Core error types for the CM2 client

use cm_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the client
#[derive(Error, Debug)]
pub enum CmError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Backend error
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Duplex channel errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// A send was attempted while the channel was not open
    #[error("Not connected")]
    NotConnected,

    /// The channel could not be opened
    #[error("Dial failed: {0}")]
    Dial(String),

    /// The open channel failed mid-stream
    #[error("Transport error: {0}")]
    Transport(String),

    /// The channel was closed by the peer
    #[error("Connection closed")]
    Closed,

    /// An outbound message could not be encoded
    #[error("Encode error: {0}")]
    Encode(#[from] ProtocolError),
}

/// Session-level errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// A user request is already outstanding
    #[error("A request is already being processed")]
    Busy,

    /// No session id could be obtained
    #[error("Session initialization failed: {0}")]
    Initialization(#[source] BackendError),

    /// A REST collaborator failed
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The channel rejected a send
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// REST collaborator errors
#[derive(Error, Debug)]
pub enum BackendError {
    /// The request never produced a response
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Non-2xx response
    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body had an unexpected shape
    #[error("Invalid response: {0}")]
    Decode(String),

    /// The backend reported a validation or domain failure
    #[error("{0}")]
    Domain(String),

    /// Export format not offered by the backend
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_message() {
        let err = BackendError::Status {
            status: 404,
            message: "Session not found".to_string(),
        };
        assert_eq!(err.to_string(), "Backend returned 404: Session not found");
    }

    #[test]
    fn test_session_error_wraps_connection() {
        let err: SessionError = ConnectionError::NotConnected.into();
        assert!(matches!(err, SessionError::Connection(ConnectionError::NotConnected)));
        assert_eq!(err.to_string(), "Not connected");
    }
}
