//! Core traits for the tenant isolation core

use async_trait::async_trait;
use errors::TenancyResult;

use crate::types::{CustomDomain, Subdomain, Tenant, TenantId, TenantStatus};

/// Registry of tenants and their routable aliases.
///
/// Implementations must enforce alias uniqueness on write: a subdomain or
/// custom domain claimed by one tenant is rejected with
/// `TenancyError::AmbiguousAlias` when another tenant tries to claim it.
/// Lookups never consider status; callers decide what an inactive tenant
/// means for them.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn get(&self, id: &TenantId) -> TenancyResult<Option<Tenant>>;

    async fn find_by_custom_domain(&self, domain: &CustomDomain) -> TenancyResult<Option<Tenant>>;

    async fn find_by_subdomain(&self, subdomain: &Subdomain) -> TenancyResult<Option<Tenant>>;

    /// Oldest active tenant. Only used by the development fallback.
    async fn first_available(&self) -> TenancyResult<Option<Tenant>>;

    /// Create or replace a tenant record.
    async fn upsert(&self, tenant: Tenant) -> TenancyResult<()>;

    async fn set_status(&self, id: &TenantId, status: TenantStatus) -> TenancyResult<Tenant>;

    async fn list(&self) -> TenancyResult<Vec<Tenant>>;
}

/// A business entity partitioned by tenant.
///
/// `RECORD_TYPE` doubles as the table or collection name. Types with
/// `REQUIRES_TENANT = false` may hold shared rows without a tenant
/// reference; those rows are visible to every tenant but never writable
/// through a tenant scope.
pub trait TenantOwned: Clone + Send + Sync + 'static {
    const RECORD_TYPE: &'static str;
    const REQUIRES_TENANT: bool = true;

    fn record_id(&self) -> &str;

    fn tenant_id(&self) -> Option<&TenantId>;

    fn set_tenant_id(&mut self, tenant_id: TenantId);
}
