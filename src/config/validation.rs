//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate listen addresses carry a usable port
//! - Detect the diagnostic listener colliding with the main one
//! - Validate log levels
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::str::FromStr;

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::net::listener::bind_target;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid listen address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("profiling.bind_address must differ from listener.bind_address ({0})")]
    AddressCollision(String),

    #[error("{field}: unknown log level {value:?}")]
    InvalidLevel { field: &'static str, value: String },
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !has_port(&config.listener.bind_address) {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.profiling.enabled {
        if !has_port(&config.profiling.bind_address) {
            errors.push(ValidationError::InvalidAddress {
                field: "profiling.bind_address",
                value: config.profiling.bind_address.clone(),
            });
        } else if collides(&config.listener.bind_address, &config.profiling.bind_address) {
            errors.push(ValidationError::AddressCollision(
                config.profiling.bind_address.clone(),
            ));
        }
    }

    if tracing::Level::from_str(&config.observability.request_log_level).is_err() {
        errors.push(ValidationError::InvalidLevel {
            field: "observability.request_log_level",
            value: config.observability.request_log_level.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn port_of(address: &str) -> Option<u16> {
    let target = bind_target(address);
    let (host, port) = target.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    port.parse().ok()
}

fn has_port(address: &str) -> bool {
    port_of(address).is_some()
}

// Port 0 picks a fresh ephemeral port per bind, so it never collides.
fn collides(main: &str, profiling: &str) -> bool {
    match (port_of(main), port_of(profiling)) {
        (Some(0), _) | (_, Some(0)) => false,
        (Some(a), Some(b)) => a == b && bind_target(main) == bind_target(profiling),
        _ => false,
    }
}
