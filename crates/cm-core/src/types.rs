//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::serde_utils::duration_millis;

/// Lifecycle state of a session's duplex channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No channel open and none scheduled
    #[default]
    Disconnected,
    /// First dial in progress
    Connecting,
    /// Channel open and ready to send
    Connected,
    /// Channel dropped, waiting for or performing a redial
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

fn default_case_timeout() -> Duration {
    Duration::from_millis(30_000)
}

/// A benchmark prompt paired with its reference procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Stable identifier, the key of recorded results
    pub id: String,
    /// Display name
    pub name: String,
    /// Natural-language prompt sent to the generation model
    pub prompt: String,
    /// Code executed out of band to produce the reference model
    pub reference_procedure: String,
    /// How long to wait for a response
    #[serde(
        rename = "timeout_ms",
        with = "duration_millis",
        default = "default_case_timeout"
    )]
    pub timeout: Duration,
}

/// Which side of a comparison an expectation produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectationKind {
    /// Answer from the generation model over the session channel
    Llm,
    /// Reference model from the side-channel procedure
    GroundTruth,
}

impl fmt::Display for ExpectationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectationKind::Llm => write!(f, "llm"),
            ExpectationKind::GroundTruth => write!(f, "ground_truth"),
        }
    }
}

/// CAD export formats offered by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Step,
    Iges,
    Stl,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Step => "step",
            ExportFormat::Iges => "iges",
            ExportFormat::Stl => "stl",
        }
    }

    /// Conventional file extension
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Step => "step",
            ExportFormat::Iges => "iges",
            ExportFormat::Stl => "stl",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = crate::error::BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "step" | "stp" => Ok(ExportFormat::Step),
            "iges" | "igs" => Ok(ExportFormat::Iges),
            "stl" => Ok(ExportFormat::Stl),
            _ => Err(crate::error::BackendError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Connected), "connected");
        assert_eq!(format!("{}", ConnectionState::Reconnecting), "reconnecting");
        assert!(!ConnectionState::Disconnected.is_connected());
    }

    #[test]
    fn test_test_case_default_timeout() {
        let case: TestCase = toml::from_str(
            r#"
            id = "case-01"
            name = "Box"
            prompt = "Create a box"
            reference_procedure = "result = cq.Workplane().box(1, 1, 1)"
            "#,
        )
        .unwrap();
        assert_eq!(case.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_test_case_explicit_timeout() {
        let case: TestCase = serde_json::from_str(
            r#"{"id":"c","name":"n","prompt":"p","reference_procedure":"r","timeout_ms":1500}"#,
        )
        .unwrap();
        assert_eq!(case.timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!("STEP".parse::<ExportFormat>().unwrap(), ExportFormat::Step);
        assert_eq!("igs".parse::<ExportFormat>().unwrap(), ExportFormat::Iges);
        assert!("obj".parse::<ExportFormat>().is_err());
    }
}
