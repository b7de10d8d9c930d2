//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = toml::from_str(content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply command-line address overrides and validate the result again.
///
/// A profiling address also turns the profiling listener on.
pub fn apply_overrides(
    mut config: ServerConfig,
    listen: Option<String>,
    profile: Option<String>,
) -> Result<ServerConfig, ConfigError> {
    if let Some(listen) = listen {
        config.listener.bind_address = listen;
    }
    if let Some(profile) = profile {
        config.profiling.enabled = true;
        config.profiling.bind_address = profile;
    }

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}
