//! Rental catalog: the tenant-owned resource exposed by the API, and the
//! background reindex job that runs over it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use context::{JobError, JobHandler, ScopeEnforcer, TenantJob};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use storage::InMemoryRecords;
use tenant_core::{TenantId, TenantOwned};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub tenant_id: Option<TenantId>,
    pub sku: String,
    pub name: String,
    pub daily_rate_cents: i64,
    pub created_at: DateTime<Utc>
}

impl TenantOwned for Product {
    const RECORD_TYPE: &'static str = "products";

    fn record_id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    fn set_tenant_id(&mut self, tenant_id: TenantId) {
        self.tenant_id = Some(tenant_id);
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewProduct {
    #[validate(length(min = 1, max = 64))]
    pub sku: String,

    #[validate(length(min = 1, max = 200))]
    pub name: String,

    #[validate(range(min = 0))]
    pub daily_rate_cents: i64,

    /// Normally omitted; filled from the active tenant.
    #[serde(default)]
    pub tenant_id: Option<TenantId>
}

impl NewProduct {
    pub fn into_product(self) -> Product {
        Product {
            id: Uuid::new_v4().to_string(),
            tenant_id: self.tenant_id,
            sku: self.sku,
            name: self.name,
            daily_rate_cents: self.daily_rate_cents,
            created_at: Utc::now()
        }
    }
}

pub type ProductStore = InMemoryRecords<Product>;

pub const REINDEX_JOB: &str = "catalog_reindex";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReindexRequest {
    #[serde(default)]
    pub full: bool
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReindexReport {
    pub job_id: Uuid,
    pub tenant_id: TenantId,
    pub indexed: usize,
    pub finished_at: DateTime<Utc>
}

/// Rebuilds a tenant's catalog index. Runs with the job's tenant active and
/// reads the catalog only through the scoped repository.
pub struct Reindexer {
    products: Arc<ProductStore>,
    reports: DashMap<TenantId, ReindexReport>
}

impl Reindexer {
    pub fn new(products: Arc<ProductStore>) -> Self {
        Self {
            products,
            reports: DashMap::new()
        }
    }

    pub fn last_report(&self, tenant_id: &TenantId) -> Option<ReindexReport> {
        self.reports.get(tenant_id).map(|r| r.clone())
    }
}

#[async_trait]
impl JobHandler<ReindexRequest> for Reindexer {
    async fn handle(&self, job: &TenantJob<ReindexRequest>) -> Result<(), JobError> {
        let scope = ScopeEnforcer::scoped::<Product>()?;
        let indexed = self.products.count(&scope);

        info!(indexed, full = job.payload.full, "Catalog reindexed");
        self.reports.insert(
            job.tenant_id.clone(),
            ReindexReport {
                job_id: job.id,
                tenant_id: job.tenant_id.clone(),
                indexed,
                finished_at: Utc::now()
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use context::TenantContext;
    use tenant_core::{Subdomain, Tenant};

    fn tenant(id: &str) -> Arc<Tenant> {
        Arc::new(Tenant::new(
            TenantId::new(id.to_string()).unwrap(),
            id,
            Subdomain::parse(id).unwrap()
        ))
    }

    fn new_product(sku: &str) -> NewProduct {
        NewProduct {
            sku: sku.to_string(),
            name: "Cargo van".to_string(),
            daily_rate_cents: 8900,
            tenant_id: None
        }
    }

    #[test]
    fn test_new_product_validation() {
        assert!(new_product("VAN-1").validate().is_ok());
        assert!(new_product("").validate().is_err());

        let negative = NewProduct {
            daily_rate_cents: -1,
            ..new_product("VAN-1")
        };
        assert!(negative.validate().is_err());
    }

    #[tokio::test]
    async fn test_reindex_counts_only_job_tenant_products() {
        let products = Arc::new(ProductStore::new());
        for (owner, sku) in [("acme", "A1"), ("acme", "A2"), ("beta", "B1")] {
            let products = products.clone();
            TenantContext::run_as(tenant(owner), async move {
                let scope = ScopeEnforcer::scoped::<Product>().unwrap();
                products.insert(&scope, new_product(sku).into_product()).unwrap();
            })
            .await
            .unwrap();
        }

        let reindexer = Reindexer::new(products);
        let job = TenantJob::new(
            TenantId::new("acme".to_string()).unwrap(),
            REINDEX_JOB,
            ReindexRequest::default()
        );
        TenantContext::run_as(tenant("acme"), reindexer.handle(&job))
            .await
            .unwrap()
            .unwrap();

        let report = reindexer.last_report(&job.tenant_id).unwrap();
        assert_eq!(report.indexed, 2);
        assert_eq!(report.job_id, job.id);
    }

    #[tokio::test]
    async fn test_reindex_without_tenant_fails() {
        let reindexer = Reindexer::new(Arc::new(ProductStore::new()));
        let job = TenantJob::new(
            TenantId::new("acme".to_string()).unwrap(),
            REINDEX_JOB,
            ReindexRequest::default()
        );
        let err = reindexer.handle(&job).await.unwrap_err();
        assert!(matches!(err, JobError::Tenancy(_)));
    }
}
