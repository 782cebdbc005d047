//! # Configuration System
//!
//! Centralized configuration management for the booking backend.
//!
//! This crate provides:
//! - Configuration structures for tenancy, server, cache, database and
//!   observability
//! - Environment variable loading (12-factor app principles)
//! - Configuration file loading (TOML/YAML)
//! - Configuration precedence (env > file > defaults)
//! - Configuration validation

pub mod config;
pub mod file_loader;
pub mod loader;
pub mod validation;

use std::path::Path;

pub use config::{
    CacheConfig, Config, DatabaseConfig, DeploymentConfig, DevFallback, ObservabilityConfig,
    ServerConfig, TenancyConfig
};
pub use file_loader::{ConfigFileError, load_from_file, load_from_toml, load_from_yaml};
pub use loader::{EnvError, apply_env, load_from_env};
pub use validation::validate;

/// Errors raised while assembling the effective configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    File(#[from] ConfigFileError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors)
}

/// Build the effective configuration: defaults, then the optional file,
/// then environment overrides, then validation.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let base = match path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration file");
            load_from_file(path)?
        }
        None => Config::default()
    };

    let config = apply_env(base)?;
    validate(&config)?;

    if config.tenancy.dev_fallback != DevFallback::Disabled {
        tracing::warn!(
            fallback = ?config.tenancy.dev_fallback,
            mode = %config.deployment.mode,
            "Development tenant fallback is enabled"
        );
    }

    Ok(config)
}
