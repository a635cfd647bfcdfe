//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use cm_core::config::{self, ClientConfig};

fn resolve(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

/// Show current configuration
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Using built-in defaults. Run 'cm2 config init' to create a file");
        println!();
        println!("{}", toml::to_string_pretty(&ClientConfig::default())?);
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    println!("{}", content);

    Ok(())
}

/// Print the configuration file path
pub fn config_path(config_path: Option<&PathBuf>) -> Result<()> {
    println!("{}", resolve(config_path).display());
    Ok(())
}

/// Write the default configuration
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let path = resolve(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    write_default(&path)?;
    print_success(&format!("Created configuration file: {:?}", path));
    Ok(())
}

fn write_default(path: &Path) -> Result<()> {
    config::save_config(path, &ClientConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))
}

/// Load the configuration, applying the `--server` override
pub fn load(config_path: Option<&PathBuf>, server: Option<&str>) -> Result<ClientConfig> {
    let path = resolve(config_path);
    let mut config: ClientConfig = config::load_or_default(&path)
        .with_context(|| format!("Failed to load config file: {:?}", path))?;

    if let Some(server) = server {
        config.server_url = server.to_string();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        config_init(Some(&path), false).unwrap();
        assert!(path.exists());

        let config = load(Some(&path), None).unwrap();
        assert_eq!(config.server_url, "http://localhost:8000");
    }

    #[test]
    fn test_server_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = load(Some(&path), Some("https://cad.example.com")).unwrap();
        assert_eq!(config.server_url, "https://cad.example.com");
    }

    #[test]
    fn test_invalid_server_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        assert!(load(Some(&path), Some("not a url")).is_err());
    }

    #[test]
    fn test_init_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "server_url = \"http://other:9000\"\n").unwrap();

        config_init(Some(&path), false).unwrap();
        let config = load(Some(&path), None).unwrap();
        assert_eq!(config.server_url, "http://other:9000");
    }
}
