//! Configuration management for the CM2 client

mod client;
pub mod serde_utils;

pub use client::{BackoffConfig, BenchConfig, ClientConfig};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cm2")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    tracing::debug!(path = %path.display(), "Loading config");
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    Ok(toml::from_str(&content)?)
}

/// Load configuration, falling back to defaults when the file does not exist
pub fn load_or_default<T>(path: &Path) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned + Default,
{
    match load_config(path) {
        Err(ConfigError::NotFound(_)) => Ok(T::default()),
        other => other,
    }
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ClientConfig::default();
        config.server_url = "http://cad.internal:9000".to_string();
        save_config(&path, &config).unwrap();

        let loaded: ClientConfig = load_config(&path).unwrap();
        assert_eq!(loaded.server_url, "http://cad.internal:9000");
        assert_eq!(loaded.reconnect.max_attempts, 5);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let err = load_config::<ClientConfig>(&path).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));

        let config: ClientConfig = load_or_default(&path).unwrap();
        assert_eq!(config.server_url, "http://localhost:8000");
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "server_url = [").unwrap();

        let err = load_or_default::<ClientConfig>(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
