//! Session identifier type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned identifier binding one client to one backend generation context
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create a new session ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form used in log lines and file names
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(idx, _)| idx)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_display() {
        let id = SessionId::new("abc123");
        assert_eq!(format!("{}", id), "abc123");
    }

    #[test]
    fn test_session_id_short() {
        let id = SessionId::new("0123456789abcdef");
        assert_eq!(id.short(), "01234567");
        assert_eq!(SessionId::new("abc").short(), "abc");
    }

    #[test]
    fn test_session_id_serializes_as_string() {
        let json = serde_json::to_string(&SessionId::new("abc123")).unwrap();
        assert_eq!(json, r#""abc123""#);
    }
}
