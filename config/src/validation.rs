//! # Configuration Validation
//!
//! Provides validation for all configuration structures using the `validator` crate.

use crate::config::Config;
use validator::Validate;

/// Validate configuration structure.
///
/// ## Validation Rules
/// ### Tenancy
/// - `base_domain`: lower-case host name with at least two labels
/// - `tenant_free_paths`: every entry starts with `/`
/// - `dev_fallback`: must be `disabled` when `deployment.mode` is "production"
///
/// ### Server
/// - `port`: 1-65535
/// - `job_queue_capacity`: 1-100000
///
/// ### Cache
/// - `ttl_seconds`: 1-3600
/// - `max_entries`: 1-1000000
///
/// ### Observability
/// - `log_level`: must be "trace", "debug", "info", "warn", or "error"
pub fn validate(config: &Config) -> Result<(), validator::ValidationErrors> {
    config.validate()
}
