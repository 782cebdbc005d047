//! Tenant-scoped SQL against the shared testcontainer.

use std::sync::Arc;

use context::{AuditReason, ScopeEnforcer, TenantContext};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use storage::{ScopedSql, UnscopedSql};
use tenant_core::{Subdomain, Tenant, TenantId, TenantOwned};
use testing::{postgres, unique_id};

#[derive(Debug, Clone)]
struct Reservation {
    id: String,
    tenant_id: Option<TenantId>
}

impl TenantOwned for Reservation {
    const RECORD_TYPE: &'static str = "reservations";

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

async fn pool() -> Option<PgPool> {
    let Some(fixture) = postgres().await else {
        eprintln!("Skipping PostgreSQL test: Docker not available");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(fixture.url())
        .await
        .unwrap();
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS reservations (
            id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY (tenant_id, id)
        )"
    )
    .execute(&pool)
    .await
    .unwrap();
    Some(pool)
}

fn tenant(id: &str) -> Arc<Tenant> {
    Arc::new(Tenant::new(
        TenantId::new(id.to_string()).unwrap(),
        id,
        Subdomain::parse(id).unwrap()
    ))
}

async fn seed(pool: &PgPool, tenant_id: &str, ids: &[&str]) {
    for id in ids {
        sqlx::query("INSERT INTO reservations (id, tenant_id, status) VALUES ($1, $2, 'confirmed')")
            .bind(*id)
            .bind(tenant_id)
            .execute(pool)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_scoped_select_returns_only_active_tenant_rows() {
    let Some(pool) = pool().await else {
        return;
    };
    let x = unique_id("x");
    let y = unique_id("y");
    seed(&pool, &x, &["r1", "r2"]).await;
    seed(&pool, &y, &["r3"]).await;

    let rows = TenantContext::run_as(tenant(&x), async {
        let scope = ScopeEnforcer::scoped::<Reservation>().unwrap();
        ScopedSql::select(&pool, &scope, "id, tenant_id")
            .unwrap()
            .order_by("id")
            .fetch_all()
            .await
            .unwrap()
    })
    .await
    .unwrap();

    let owners: Vec<String> = rows.iter().map(|r| r.get("tenant_id")).collect();
    assert_eq!(owners, vec![x.clone(), x.clone()]);
}

#[tokio::test]
async fn test_scoped_delete_cannot_reach_foreign_rows() {
    let Some(pool) = pool().await else {
        return;
    };
    let x = unique_id("x");
    let y = unique_id("y");
    seed(&pool, &y, &["shared-id"]).await;

    let deleted = TenantContext::run_as(tenant(&x), async {
        let scope = ScopeEnforcer::scoped::<Reservation>().unwrap();
        ScopedSql::delete(&pool, &scope)
            .unwrap()
            .filter_eq("id", "shared-id")
            .execute()
            .await
            .unwrap()
    })
    .await
    .unwrap();
    assert_eq!(deleted, 0);

    let remaining = TenantContext::run_as(tenant(&y), async {
        let scope = ScopeEnforcer::scoped::<Reservation>().unwrap();
        ScopedSql::count(&pool, &scope).unwrap().fetch_count().await.unwrap()
    })
    .await
    .unwrap();
    assert_eq!(remaining, 1);
}

#[tokio::test]
async fn test_unscoped_select_spans_tenants() {
    let Some(pool) = pool().await else {
        return;
    };
    let marker = unique_id("audit");
    seed(&pool, &unique_id("x"), &[marker.as_str()]).await;
    seed(&pool, &unique_id("y"), &[marker.as_str()]).await;

    let admin = ScopeEnforcer::unscoped::<Reservation>(AuditReason::new("reconciliation", "ops"));
    let rows = UnscopedSql::select(&pool, &admin, "tenant_id")
        .unwrap()
        .filter_eq("id", marker.as_str())
        .fetch_all()
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}
