//! PostgreSQL tenant directory.

use std::str::FromStr;

use async_trait::async_trait;
use errors::{StorageError, TenancyError, TenancyResult};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tenant_core::{
    CustomDomain, Subdomain, Tenant, TenantDirectory, TenantId, TenantStatus, check_custom_domain_placement
};
use tracing::{error, info};

const BACKEND: &str = "postgres";
/// Name of the unique index created in `initialize_schema`.
const CUSTOM_DOMAIN_INDEX: &str = "idx_tenants_custom_domain";

pub(crate) fn query_error(err: sqlx::Error) -> StorageError {
    StorageError::QueryError {
        backend: BACKEND.to_string(),
        reason: err.to_string()
    }
}

fn decode_error(field: &str, reason: impl std::fmt::Display) -> StorageError {
    StorageError::SerializationError {
        error_type: format!("tenants.{field}"),
        reason: reason.to_string()
    }
}

fn ambiguous(tenant: &Tenant, alias: String, existing_tenant_id: String) -> TenancyError {
    error!(
        alias = %alias,
        existing_tenant_id = %existing_tenant_id,
        tenant_id = %tenant.id,
        "Rejected ambiguous tenant alias"
    );
    TenancyError::AmbiguousAlias {
        alias,
        existing_tenant_id
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

pub struct PostgresTenantDirectory {
    pool: PgPool,
    base_domain: Option<String>
}

impl PostgresTenantDirectory {
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(url)
            .await
            .map_err(|e| StorageError::ConnectionError {
                backend: BACKEND.to_string(),
                reason: e.to_string()
            })?;
        info!(pool_size, "Connected tenant directory to PostgreSQL");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            base_domain: None
        }
    }

    /// Refuse custom domains inside `base_domain` on write.
    pub fn with_base_domain(mut self, base_domain: impl Into<String>) -> Self {
        self.base_domain = Some(base_domain.into());
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Aliases are unique case-insensitively, enforced by expression indexes
    /// in addition to the check in `upsert`.
    pub async fn initialize_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                subdomain TEXT NOT NULL,
                custom_domain TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )"
        )
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_tenants_subdomain ON tenants (lower(subdomain))"
        )
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_tenants_custom_domain ON tenants \
             (lower(custom_domain)) WHERE custom_domain IS NOT NULL"
        )
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    /// Name the alias and holder behind a unique-index violation.
    async fn concurrent_claim(&self, tenant: &Tenant, constraint: Option<&str>) -> TenancyError {
        let custom_domain = tenant.custom_domain.as_ref().map(CustomDomain::as_str);
        let (alias, holder) = match (constraint, custom_domain) {
            (Some(CUSTOM_DOMAIN_INDEX), Some(domain)) => (
                domain.to_string(),
                sqlx::query("SELECT id FROM tenants WHERE id <> $1 AND lower(custom_domain) = $2")
                    .bind(tenant.id.as_str())
                    .bind(domain)
                    .fetch_optional(&self.pool)
                    .await
            ),
            _ => (
                tenant.subdomain.to_string(),
                sqlx::query("SELECT id FROM tenants WHERE id <> $1 AND lower(subdomain) = $2")
                    .bind(tenant.id.as_str())
                    .bind(tenant.subdomain.as_str())
                    .fetch_optional(&self.pool)
                    .await
            )
        };

        let existing_tenant_id = match holder {
            Ok(Some(row)) => row.try_get::<String, _>("id").unwrap_or_default(),
            Ok(None) => String::new(),
            Err(err) => return query_error(err).into()
        };
        ambiguous(tenant, alias, existing_tenant_id)
    }

    fn row_to_tenant(row: &PgRow) -> TenancyResult<Tenant> {
        let id: String = row.try_get("id").map_err(query_error)?;
        let subdomain: String = row.try_get("subdomain").map_err(query_error)?;
        let custom_domain: Option<String> = row.try_get("custom_domain").map_err(query_error)?;
        let status: String = row.try_get("status").map_err(query_error)?;

        Ok(Tenant {
            id: TenantId::new(id.clone()).ok_or_else(|| decode_error("id", id))?,
            name: row.try_get("name").map_err(query_error)?,
            subdomain: Subdomain::parse(&subdomain)?,
            custom_domain: custom_domain
                .as_deref()
                .map(CustomDomain::parse)
                .transpose()?,
            status: TenantStatus::from_str(&status).map_err(|e| decode_error("status", e))?,
            created_at: row.try_get("created_at").map_err(query_error)?,
            updated_at: row.try_get("updated_at").map_err(query_error)?
        })
    }

    fn optional(row: Option<PgRow>) -> TenancyResult<Option<Tenant>> {
        row.as_ref().map(Self::row_to_tenant).transpose()
    }
}

#[async_trait]
impl TenantDirectory for PostgresTenantDirectory {
    async fn get(&self, id: &TenantId) -> TenancyResult<Option<Tenant>> {
        let row = sqlx::query(
            "SELECT id, name, subdomain, custom_domain, status, created_at, updated_at \
             FROM tenants WHERE id = $1"
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;
        Self::optional(row)
    }

    async fn find_by_custom_domain(&self, domain: &CustomDomain) -> TenancyResult<Option<Tenant>> {
        let row = sqlx::query(
            "SELECT id, name, subdomain, custom_domain, status, created_at, updated_at \
             FROM tenants WHERE custom_domain IS NOT NULL AND lower(custom_domain) = $1"
        )
        .bind(domain.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;
        Self::optional(row)
    }

    async fn find_by_subdomain(&self, subdomain: &Subdomain) -> TenancyResult<Option<Tenant>> {
        let row = sqlx::query(
            "SELECT id, name, subdomain, custom_domain, status, created_at, updated_at \
             FROM tenants WHERE lower(subdomain) = $1"
        )
        .bind(subdomain.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;
        Self::optional(row)
    }

    async fn first_available(&self) -> TenancyResult<Option<Tenant>> {
        let row = sqlx::query(
            "SELECT id, name, subdomain, custom_domain, status, created_at, updated_at \
             FROM tenants WHERE status IN ('active', 'trialing') \
             ORDER BY created_at ASC, id ASC LIMIT 1"
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;
        Self::optional(row)
    }

    async fn upsert(&self, tenant: Tenant) -> TenancyResult<()> {
        let shadowed = match (&tenant.custom_domain, &self.base_domain) {
            (Some(domain), Some(base)) => domain.label_under(base),
            _ => None
        };

        let mut tx = self.pool.begin().await.map_err(query_error)?;

        let holder = sqlx::query(
            "SELECT id, subdomain, custom_domain FROM tenants \
             WHERE id <> $1 AND (lower(subdomain) = $2 \
             OR (custom_domain IS NOT NULL AND lower(custom_domain) = $3) \
             OR lower(subdomain) = $4) \
             LIMIT 1 FOR UPDATE"
        )
        .bind(tenant.id.as_str())
        .bind(tenant.subdomain.as_str())
        .bind(tenant.custom_domain.as_ref().map(CustomDomain::as_str))
        .bind(shadowed)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_error)?;

        if let Some(row) = holder {
            let existing_tenant_id: String = row.try_get("id").map_err(query_error)?;
            let held_subdomain: String = row.try_get("subdomain").map_err(query_error)?;
            let alias = if held_subdomain == tenant.subdomain.as_str() {
                tenant.subdomain.to_string()
            } else {
                tenant
                    .custom_domain
                    .as_ref()
                    .map_or_else(String::new, ToString::to_string)
            };
            return Err(ambiguous(&tenant, alias, existing_tenant_id));
        }

        if let Some(base) = &self.base_domain {
            check_custom_domain_placement(&tenant, base)?;
        }

        let inserted = sqlx::query(
            "INSERT INTO tenants (id, name, subdomain, custom_domain, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                subdomain = EXCLUDED.subdomain,
                custom_domain = EXCLUDED.custom_domain,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at"
        )
        .bind(tenant.id.as_str())
        .bind(&tenant.name)
        .bind(tenant.subdomain.as_str())
        .bind(tenant.custom_domain.as_ref().map(CustomDomain::as_str))
        .bind(tenant.status.to_string())
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {
                tx.commit().await.map_err(query_error)?;
                Ok(())
            }
            Err(err) if is_unique_violation(&err) => {
                // A concurrent writer claimed the alias after the holder check.
                let constraint = err
                    .as_database_error()
                    .and_then(|db| db.constraint())
                    .map(ToString::to_string);
                if let Err(rollback) = tx.rollback().await {
                    error!(error = %rollback, "Failed to roll back tenant upsert");
                }
                Err(self.concurrent_claim(&tenant, constraint.as_deref()).await)
            }
            Err(err) => Err(query_error(err).into())
        }
    }

    async fn set_status(&self, id: &TenantId, status: TenantStatus) -> TenancyResult<Tenant> {
        let row = sqlx::query(
            "UPDATE tenants SET status = $2, updated_at = now() WHERE id = $1 \
             RETURNING id, name, subdomain, custom_domain, status, created_at, updated_at"
        )
        .bind(id.as_str())
        .bind(status.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => Self::row_to_tenant(&row),
            None => Err(StorageError::NotFound {
                backend: BACKEND.to_string(),
                id: id.to_string()
            }
            .into())
        }
    }

    async fn list(&self) -> TenancyResult<Vec<Tenant>> {
        let rows = sqlx::query(
            "SELECT id, name, subdomain, custom_domain, status, created_at, updated_at \
             FROM tenants ORDER BY created_at ASC, id ASC"
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;
        rows.iter().map(Self::row_to_tenant).collect()
    }
}
