//! Client configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;

/// Configuration for the CM2 client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the generation backend
    pub server_url: String,

    /// Base URL of the duplex channel, derived from `server_url` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,

    /// Reconnection policy for the duplex channel
    pub reconnect: BackoffConfig,

    /// How long a user request may stay outstanding before it is abandoned
    #[serde(with = "duration_secs")]
    pub response_timeout: Duration,

    /// Timeout for one-shot REST requests
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Benchmark runner settings
    pub bench: BenchConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000".to_string(),
            ws_url: None,
            reconnect: BackoffConfig::default(),
            response_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(30),
            bench: BenchConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parsed backend base URL
    pub fn http_base(&self) -> Result<Url, ConfigError> {
        let mut base = Url::parse(&self.server_url)
            .map_err(|e| ConfigError::Invalid(format!("server_url: {}", e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base)
    }

    /// Address of the duplex channel for a session
    pub fn websocket_url(&self, session_id: &str) -> Result<Url, ConfigError> {
        if let Some(ws) = &self.ws_url {
            let raw = format!("{}/ws/{}", ws.trim_end_matches('/'), session_id);
            return Url::parse(&raw).map_err(|e| ConfigError::Invalid(format!("ws_url: {}", e)));
        }

        let mut url = self.http_base()?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(ConfigError::Invalid(format!(
                    "server_url must be http or https, got {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::Invalid(format!("cannot use scheme {}", scheme)))?;
        let path = format!("{}ws/{}", url.path(), session_id);
        url.set_path(&path);
        Ok(url)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.http_base()?;
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(ConfigError::Invalid(format!(
                "reconnect.jitter must be within 0.0..=1.0, got {}",
                self.reconnect.jitter
            )));
        }
        if self.reconnect.initial.is_zero() {
            return Err(ConfigError::Invalid(
                "reconnect.initial must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Reconnect attempts before giving up
    pub max_attempts: u32,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max_attempts: 5,
            jitter: 0.0,
        }
    }
}

/// Benchmark runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Pause after each case in sequential mode
    #[serde(with = "duration_millis")]
    pub inter_case_delay: Duration,

    /// Timeout applied to cases that do not set one
    #[serde(with = "duration_millis")]
    pub default_case_timeout: Duration,

    /// TOML file with `[[cases]]`, built-in cases when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cases_path: Option<PathBuf>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            inter_case_delay: Duration::from_millis(2000),
            default_case_timeout: Duration::from_millis(30_000),
            cases_path: None,
        }
    }
}
