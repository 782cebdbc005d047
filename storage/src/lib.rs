//! # Storage Layer
//!
//! Tenant directory backends (in-memory, PostgreSQL) behind a TTL alias
//! cache, and tenant-scoped access to tenant-owned records.

pub mod cache;
pub mod postgres;
pub mod query_builder;
pub mod records;

use std::sync::Arc;

use config::{CacheConfig, DatabaseConfig, TenancyConfig};
use errors::StorageError;
use tenant_core::{InMemoryTenantDirectory, TenantDirectory};
use tracing::info;

pub use cache::CachedTenantDirectory;
pub use postgres::PostgresTenantDirectory;
pub use query_builder::{ScopedSql, UnscopedSql};
pub use records::InMemoryRecords;

/// Build the tenant directory described by the configuration.
///
/// PostgreSQL when a database URL is set, in-memory otherwise; wrapped in the
/// alias cache when caching is enabled. Either backend refuses custom domains
/// inside the tenancy base domain.
pub async fn build_directory(
    database: &DatabaseConfig,
    cache: &CacheConfig,
    tenancy: &TenancyConfig
) -> Result<Arc<dyn TenantDirectory>, StorageError> {
    let backend: Arc<dyn TenantDirectory> = match &database.url {
        Some(url) => {
            let directory = PostgresTenantDirectory::connect(url, database.pool_size)
                .await?
                .with_base_domain(&tenancy.base_domain);
            directory.initialize_schema().await?;
            Arc::new(directory)
        }
        None => {
            info!("No database configured, using in-memory tenant directory");
            Arc::new(InMemoryTenantDirectory::new().with_base_domain(&tenancy.base_domain))
        }
    };

    if cache.enabled {
        Ok(Arc::new(CachedTenantDirectory::from_config(backend, cache)))
    } else {
        Ok(backend)
    }
}
