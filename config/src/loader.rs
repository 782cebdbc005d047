//! # Environment Variable Loader
//!
//! Loads configuration from environment variables following 12-factor app
//! principles. Every variable uses the `RB_` prefix.

use crate::config::{Config, DevFallback};
use std::env;

/// Environment loading error.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String }
}

/// Load configuration from defaults overlaid with environment variables.
///
/// ## Environment Variables
/// ### Tenancy
/// - `RB_BASE_DOMAIN`: Base routable domain (default: "example.com")
/// - `RB_TENANT_FREE_PATHS`: Comma-separated path prefixes served without a tenant
/// - `RB_RESERVED_SUBDOMAINS`: Comma-separated labels that cannot be claimed
/// - `RB_DEV_FALLBACK`: disabled/first_available/principal_home (default: disabled)
///
/// ### Server
/// - `RB_BIND_ADDRESS`: Listener address (default: "0.0.0.0")
/// - `RB_PORT`: Listener port (default: 8080)
/// - `RB_JOB_QUEUE_CAPACITY`: Background job queue size (default: 1024)
///
/// ### Cache
/// - `RB_CACHE_ENABLED`: Enable the alias cache (true/false, default: true)
/// - `RB_CACHE_TTL_SECONDS`: Alias cache TTL (default: 60)
/// - `RB_CACHE_MAX_ENTRIES`: Alias cache capacity (default: 10000)
///
/// ### Database
/// - `RB_DATABASE_URL`: Postgres URL for the tenant directory (optional)
/// - `RB_DATABASE_POOL_SIZE`: Connection pool size (default: 10)
///
/// ### Observability
/// - `RB_LOG_LEVEL`: trace/debug/info/warn/error (default: "info")
/// - `RB_METRICS_ENABLED`: Enable the Prometheus recorder (default: true)
///
/// ### Deployment
/// - `RB_DEPLOYMENT_MODE`: development/test/production (default: "production")
pub fn load_from_env() -> Result<Config, EnvError> {
    apply_env(Config::default())
}

/// Overlay environment variables onto an existing configuration. Only
/// variables that are set replace values; everything else is kept.
pub fn apply_env(mut config: Config) -> Result<Config, EnvError> {
    if let Some(domain) = read("RB_BASE_DOMAIN") {
        config.tenancy.base_domain = domain.to_ascii_lowercase();
    }
    if let Some(paths) = read("RB_TENANT_FREE_PATHS") {
        config.tenancy.tenant_free_paths = split_list(&paths);
    }
    if let Some(reserved) = read("RB_RESERVED_SUBDOMAINS") {
        config.tenancy.reserved_subdomains = split_list(&reserved);
    }
    if let Some(fallback) = read("RB_DEV_FALLBACK") {
        config.tenancy.dev_fallback = fallback
            .parse::<DevFallback>()
            .map_err(|reason| EnvError::InvalidValue {
                key: "RB_DEV_FALLBACK".to_string(),
                reason
            })?;
    }

    if let Some(addr) = read("RB_BIND_ADDRESS") {
        config.server.bind_address = addr;
    }
    if let Some(port) = parse_env("RB_PORT")? {
        config.server.port = port;
    }
    if let Some(capacity) = parse_env("RB_JOB_QUEUE_CAPACITY")? {
        config.server.job_queue_capacity = capacity;
    }

    if let Some(enabled) = parse_env("RB_CACHE_ENABLED")? {
        config.cache.enabled = enabled;
    }
    if let Some(ttl) = parse_env("RB_CACHE_TTL_SECONDS")? {
        config.cache.ttl_seconds = ttl;
    }
    if let Some(max_entries) = parse_env("RB_CACHE_MAX_ENTRIES")? {
        config.cache.max_entries = max_entries;
    }

    if let Some(url) = read("RB_DATABASE_URL") {
        config.database.url = Some(url);
    }
    if let Some(size) = parse_env("RB_DATABASE_POOL_SIZE")? {
        config.database.pool_size = size;
    }

    if let Some(level) = read("RB_LOG_LEVEL") {
        config.observability.log_level = level.to_ascii_lowercase();
    }
    if let Some(enabled) = parse_env("RB_METRICS_ENABLED")? {
        config.observability.metrics_enabled = enabled;
    }

    if let Some(mode) = read("RB_DEPLOYMENT_MODE") {
        config.deployment.mode = mode.to_ascii_lowercase();
    }

    Ok(config)
}

fn read(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env<T>(key: &str) -> Result<Option<T>, EnvError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display
{
    match read(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| EnvError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string()
            }),
        None => Ok(None)
    }
}
