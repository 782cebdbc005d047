//! # Configuration Structures
//!
//! This module defines all configuration structures for the booking backend.
//!
//! All configuration structures:
//! - Use `serde` for serialization/deserialization
//! - Use `validator` for input validation
//! - Default to the fail-closed tenancy policy

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use validator::{Validate, ValidationError};

/// Main configuration structure.
///
/// ## Fields
/// - `tenancy`: How requests are mapped to tenants
/// - `server`: HTTP listener settings
/// - `cache`: Alias cache for the tenant directory
/// - `database`: Optional Postgres connection for the tenant directory
/// - `observability`: Logging and metrics
/// - `deployment`: Deployment mode (gates development-only behaviour)
///
/// ## Validation
/// All nested configurations must pass their own validation rules, and the
/// development fallback must be disabled in production mode.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
#[validate(schema(function = "validate_fallback_policy"))]
pub struct Config {
    #[serde(default)]
    #[validate(nested)]
    pub tenancy: TenancyConfig,

    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,

    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    #[validate(nested)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    #[validate(nested)]
    pub deployment: DeploymentConfig
}

fn validate_fallback_policy(config: &Config) -> Result<(), ValidationError> {
    if config.deployment.is_production() && config.tenancy.dev_fallback != DevFallback::Disabled {
        let mut err = ValidationError::new("dev_fallback_in_production");
        err.message = Some("development tenant fallback must be disabled in production".into());
        return Err(err);
    }
    Ok(())
}

/// What the resolver substitutes when no alias matches.
///
/// Anything other than `Disabled` exists for local iteration only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DevFallback {
    #[default]
    Disabled,
    FirstAvailable,
    PrincipalHome
}

impl std::str::FromStr for DevFallback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" | "none" => Ok(Self::Disabled),
            "first_available" => Ok(Self::FirstAvailable),
            "principal_home" => Ok(Self::PrincipalHome),
            other => Err(format!("unknown dev fallback mode: {other}"))
        }
    }
}

/// Tenant resolution settings.
///
/// ## Fields
/// - `base_domain`: Routable domain tenants live under (default: "example.com")
/// - `tenant_free_paths`: Path prefixes served without any tenant
/// - `reserved_subdomains`: Labels that can never be claimed at signup
/// - `dev_fallback`: Development-only fallback (default: disabled)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct TenancyConfig {
    #[serde(default = "default_base_domain")]
    #[validate(length(min = 3, max = 253), custom(function = "validate_base_domain"))]
    pub base_domain: String,

    #[serde(default = "default_tenant_free_paths")]
    #[validate(custom(function = "validate_path_prefixes"))]
    pub tenant_free_paths: Vec<String>,

    #[serde(default = "default_reserved_subdomains")]
    pub reserved_subdomains: Vec<String>,

    #[serde(default)]
    pub dev_fallback: DevFallback
}

fn default_base_domain() -> String {
    "example.com".to_string()
}

fn default_tenant_free_paths() -> Vec<String> {
    vec![
        "/health".to_string(),
        "/metrics".to_string(),
        "/signup".to_string(),
        "/subdomains".to_string(),
    ]
}

fn default_reserved_subdomains() -> Vec<String> {
    vec!["www".to_string(), "api".to_string(), "admin".to_string()]
}

fn validate_base_domain(domain: &str) -> Result<(), ValidationError> {
    let valid = domain == domain.to_ascii_lowercase()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.contains('.')
        && domain
            .split('.')
            .all(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_base_domain"))
    }
}

fn validate_path_prefixes(paths: &[String]) -> Result<(), ValidationError> {
    if paths.iter().all(|p| p.starts_with('/')) {
        Ok(())
    } else {
        Err(ValidationError::new("path_prefix_must_start_with_slash"))
    }
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            base_domain: default_base_domain(),
            tenant_free_paths: default_tenant_free_paths(),
            reserved_subdomains: default_reserved_subdomains(),
            dev_fallback: DevFallback::Disabled
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    #[validate(length(min = 1, max = 255))]
    pub bind_address: String,

    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    #[serde(default = "default_job_queue_capacity")]
    #[validate(range(min = 1, max = 100_000))]
    pub job_queue_capacity: usize
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_job_queue_capacity() -> usize {
    1024
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.bind_address, self.port).parse()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            job_queue_capacity: default_job_queue_capacity()
        }
    }
}

/// Alias cache settings. Entries are evicted on every tenant write, expire
/// after `ttl_seconds`, and the cache holds at most `max_entries` keys.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    #[serde(default = "default_cache_ttl_seconds")]
    #[validate(range(min = 1, max = 3600))]
    pub ttl_seconds: u64,

    #[serde(default = "default_cache_max_entries")]
    #[validate(range(min = 1, max = 1_000_000))]
    pub max_entries: usize
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl_seconds() -> u64 {
    60
}

fn default_cache_max_entries() -> usize {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_seconds: default_cache_ttl_seconds(),
            max_entries: default_cache_max_entries()
        }
    }
}

/// Postgres connection for the tenant directory. When `url` is unset the
/// server keeps tenants in memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32
}

fn default_pool_size() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: default_pool_size()
        }
    }
}

/// Logging and metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,

    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("invalid_log_level"))
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_enabled: default_metrics_enabled()
        }
    }
}

/// Deployment mode configuration.
///
/// ## Fields
/// - `mode`: "development", "test" or "production" (default: "production")
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct DeploymentConfig {
    #[serde(default = "default_deployment_mode")]
    #[validate(custom(function = "validate_deployment_mode"))]
    pub mode: String
}

fn default_deployment_mode() -> String {
    "production".to_string()
}

fn validate_deployment_mode(mode: &str) -> Result<(), ValidationError> {
    match mode {
        "development" | "test" | "production" => Ok(()),
        _ => Err(ValidationError::new("invalid_deployment_mode"))
    }
}

impl DeploymentConfig {
    pub fn is_production(&self) -> bool {
        self.mode == "production"
    }
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            mode: default_deployment_mode()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fail_closed() {
        let config = Config::default();
        assert_eq!(config.tenancy.dev_fallback, DevFallback::Disabled);
        assert!(config.deployment.is_production());
        assert!(config.tenancy.tenant_free_paths.contains(&"/health".to_string()));
    }

    #[test]
    fn test_dev_fallback_parsing() {
        assert_eq!("first_available".parse(), Ok(DevFallback::FirstAvailable));
        assert_eq!("PRINCIPAL_HOME".parse(), Ok(DevFallback::PrincipalHome));
        assert_eq!("off".parse(), Ok(DevFallback::Disabled));
        assert!("sometimes".parse::<DevFallback>().is_err());
    }

    #[test]
    fn test_socket_addr() {
        let server = ServerConfig::default();
        assert_eq!(server.socket_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_toml_with_partial_sections_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [tenancy]
            base_domain = "rentals.test"
            "#
        )
        .unwrap();
        assert_eq!(config.tenancy.base_domain, "rentals.test");
        assert_eq!(config.cache.ttl_seconds, 60);
        assert_eq!(config.server.port, 8080);
    }
}
