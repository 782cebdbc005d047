//! Tenant scoping for tenant-owned records.
//!
//! Every repository obtains a [`ScopedQuery`] before touching data:
//! - [`ScopeEnforcer::scoped`] binds the query to the active tenant and fails
//!   with `NoTenantActive` when there is none
//! - [`ScopeEnforcer::unscoped`] bypasses the filter, requires an
//!   [`AuditReason`] and emits an audit event every time it is called
//!
//! The tenant is captured when the query is created; switching the context
//! afterwards does not change which rows an existing query admits.

use std::marker::PhantomData;

use errors::{TenancyError, TenancyResult};
use tenant_core::{TenantId, TenantOwned};
use tracing::{error, warn};

use crate::execution::TenantContext;

/// Justification recorded for every unscoped access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReason {
    operation: &'static str,
    actor: String
}

impl AuditReason {
    pub fn new(operation: &'static str, actor: impl Into<String>) -> Self {
        Self {
            operation,
            actor: actor.into()
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantFilter {
    /// Rows owned by this tenant, plus shared rows for types that allow them.
    Tenant(TenantId),
    /// No tenant active and the type does not require one: shared rows only.
    SharedOnly,
    /// Administrative access to every row.
    Unscoped(AuditReason)
}

/// A tenant-filtered view over records of type `R`.
#[derive(Debug, Clone)]
pub struct ScopedQuery<R> {
    filter: TenantFilter,
    _record: PhantomData<fn() -> R>
}

impl<R: TenantOwned> ScopedQuery<R> {
    fn new(filter: TenantFilter) -> Self {
        Self {
            filter,
            _record: PhantomData
        }
    }

    pub fn filter(&self) -> &TenantFilter {
        &self.filter
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        match &self.filter {
            TenantFilter::Tenant(id) => Some(id),
            TenantFilter::SharedOnly | TenantFilter::Unscoped(_) => None
        }
    }

    pub fn is_unscoped(&self) -> bool {
        matches!(self.filter, TenantFilter::Unscoped(_))
    }

    /// Whether `record` is visible through this query.
    pub fn admits(&self, record: &R) -> bool {
        match (&self.filter, record.tenant_id()) {
            (TenantFilter::Unscoped(_), _) => true,
            (TenantFilter::Tenant(active), Some(owner)) => owner == active,
            (TenantFilter::Tenant(_), None) => !R::REQUIRES_TENANT,
            (TenantFilter::SharedOnly, owner) => owner.is_none()
        }
    }

    /// Keep only the admitted records.
    pub fn apply<'a, I>(&self, records: I) -> Vec<R>
    where
        I: IntoIterator<Item = &'a R>,
        R: 'a
    {
        records
            .into_iter()
            .filter(|record| self.admits(record))
            .cloned()
            .collect()
    }

    /// Prepare `record` for insertion through this query: fill an empty
    /// tenant reference from the scope and reject records owned by another
    /// tenant.
    pub fn prepare_insert(&self, record: &mut R) -> TenancyResult<()> {
        match &self.filter {
            TenantFilter::Tenant(active) => assign_or_check(record, active),
            TenantFilter::SharedOnly => match record.tenant_id() {
                None => Ok(()),
                Some(_) => Err(no_tenant::<R>())
            },
            TenantFilter::Unscoped(_) => {
                if R::REQUIRES_TENANT && record.tenant_id().is_none() {
                    Err(TenancyError::validation(
                        "tenant_id",
                        format!("{} requires an explicit tenant for unscoped writes", R::RECORD_TYPE)
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Check that an update keeps the record inside this query.
    pub fn check_update(&self, before: &R, after: &R) -> TenancyResult<()> {
        if before.tenant_id() == after.tenant_id() || self.is_unscoped() {
            return Ok(());
        }
        Err(cross_tenant::<R>(after, self.tenant_id()))
    }
}

/// Entry point for all tenant-owned data access.
pub struct ScopeEnforcer;

impl ScopeEnforcer {
    /// A query bound to the active tenant.
    pub fn scoped<R: TenantOwned>() -> TenancyResult<ScopedQuery<R>> {
        match TenantContext::current_id() {
            Some(id) => Ok(ScopedQuery::new(TenantFilter::Tenant(id))),
            None if !R::REQUIRES_TENANT => Ok(ScopedQuery::new(TenantFilter::SharedOnly)),
            None => Err(no_tenant::<R>())
        }
    }

    /// A query with no tenant filter, for administrative call paths only.
    pub fn unscoped<R: TenantOwned>(reason: AuditReason) -> ScopedQuery<R> {
        warn!(
            target: "tenancy::audit",
            record_type = R::RECORD_TYPE,
            operation = reason.operation(),
            actor = reason.actor(),
            active_tenant = ?TenantContext::current_id(),
            "Unscoped tenant access"
        );
        metrics::counter!("tenancy_unscoped_access_total", "record" => R::RECORD_TYPE).increment(1);
        ScopedQuery::new(TenantFilter::Unscoped(reason))
    }

    /// Fill an empty tenant reference from the active tenant before the
    /// record is validated and persisted.
    pub fn assign_tenant_on_create<R: TenantOwned>(record: &mut R) -> TenancyResult<()> {
        match TenantContext::current_id() {
            Some(active) => assign_or_check(record, &active),
            None if record.tenant_id().is_some() || !R::REQUIRES_TENANT => Ok(()),
            None => Err(no_tenant::<R>())
        }
    }
}

fn assign_or_check<R: TenantOwned>(record: &mut R, active: &TenantId) -> TenancyResult<()> {
    match record.tenant_id() {
        None => {
            record.set_tenant_id(active.clone());
            Ok(())
        }
        Some(owner) if owner == active => Ok(()),
        Some(_) => Err(cross_tenant::<R>(record, Some(active)))
    }
}

fn no_tenant<R: TenantOwned>() -> TenancyError {
    error!(record_type = R::RECORD_TYPE, "Scoped access attempted without an active tenant");
    TenancyError::NoTenantActive {
        record_type: R::RECORD_TYPE.to_string()
    }
}

fn cross_tenant<R: TenantOwned>(record: &R, active: Option<&TenantId>) -> TenancyError {
    let err = TenancyError::CrossTenantWrite {
        record_type: R::RECORD_TYPE.to_string(),
        record_id: record.record_id().to_string(),
        record_tenant_id: record
            .tenant_id()
            .map_or_else(|| "none".to_string(), |t| t.to_string()),
        active_tenant_id: active.map_or_else(|| "none".to_string(), |t| t.to_string())
    };
    error!(error = %err, "Rejected cross-tenant write");
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tenant_core::{Subdomain, Tenant};

    #[derive(Debug, Clone, PartialEq)]
    struct Booking {
        id: String,
        tenant_id: Option<TenantId>
    }

    impl TenantOwned for Booking {
        const RECORD_TYPE: &'static str = "bookings";

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

    #[derive(Debug, Clone, PartialEq)]
    struct Currency {
        code: String,
        tenant_id: Option<TenantId>
    }

    impl TenantOwned for Currency {
        const RECORD_TYPE: &'static str = "currencies";
        const REQUIRES_TENANT: bool = false;

        fn record_id(&self) -> &str {
            &self.code
        }

        fn tenant_id(&self) -> Option<&TenantId> {
            self.tenant_id.as_ref()
        }

        fn set_tenant_id(&mut self, tenant_id: TenantId) {
            self.tenant_id = Some(tenant_id);
        }
    }

    fn tid(id: &str) -> TenantId {
        TenantId::new(id.to_string()).unwrap()
    }

    fn tenant(id: &str) -> Arc<Tenant> {
        Arc::new(Tenant::new(tid(id), id, Subdomain::parse(id).unwrap()))
    }

    fn booking(id: &str, owner: Option<&str>) -> Booking {
        Booking {
            id: id.to_string(),
            tenant_id: owner.map(tid)
        }
    }

    fn bookings() -> Vec<Booking> {
        vec![
            booking("x1", Some("x")),
            booking("x2", Some("x")),
            booking("y1", Some("y")),
            booking("orphan", None),
        ]
    }

    #[tokio::test]
    async fn test_scoped_query_only_admits_active_tenant() {
        let visible = TenantContext::run_as(tenant("x"), async {
            let query = ScopeEnforcer::scoped::<Booking>().unwrap();
            query.apply(&bookings())
        })
        .await
        .unwrap();

        let ids: Vec<_> = visible.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["x1", "x2"]);
    }

    #[tokio::test]
    async fn test_scoped_query_without_tenant_fails_loudly() {
        TenantContext::scope(async {
            let err = ScopeEnforcer::scoped::<Booking>().unwrap_err();
            assert!(matches!(err, TenancyError::NoTenantActive { .. }));
        })
        .await;

        assert!(ScopeEnforcer::scoped::<Booking>().is_err());
    }

    #[tokio::test]
    async fn test_query_keeps_tenant_captured_at_creation() {
        TenantContext::scope(async {
            let x = TenantContext::enter(tenant("x")).unwrap();
            let query = ScopeEnforcer::scoped::<Booking>().unwrap();
            let y = TenantContext::enter(tenant("y")).unwrap();

            assert_eq!(query.tenant_id(), Some(&tid("x")));
            assert!(query.apply(&bookings()).iter().all(|b| b.tenant_id == Some(tid("x"))));

            y.exit().unwrap();
            x.exit().unwrap();
        })
        .await;
    }

    #[test]
    fn test_unscoped_requires_reason_and_admits_all() {
        let query = ScopeEnforcer::unscoped::<Booking>(AuditReason::new("billing_export", "ops@vendor"));
        assert!(query.is_unscoped());
        assert_eq!(query.apply(&bookings()).len(), 4);
        match query.filter() {
            TenantFilter::Unscoped(reason) => assert_eq!(reason.operation(), "billing_export"),
            other => panic!("unexpected filter {other:?}")
        }
    }

    #[tokio::test]
    async fn test_assign_tenant_on_create() {
        TenantContext::run_as(tenant("x"), async {
            let mut fresh = booking("new", None);
            ScopeEnforcer::assign_tenant_on_create(&mut fresh).unwrap();
            assert_eq!(fresh.tenant_id, Some(tid("x")));

            let mut own = booking("own", Some("x"));
            assert!(ScopeEnforcer::assign_tenant_on_create(&mut own).is_ok());

            let mut foreign = booking("foreign", Some("y"));
            let err = ScopeEnforcer::assign_tenant_on_create(&mut foreign).unwrap_err();
            assert!(matches!(err, TenancyError::CrossTenantWrite { .. }));
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_assign_tenant_on_create_without_tenant_fails() {
        let mut fresh = booking("new", None);
        let err = ScopeEnforcer::assign_tenant_on_create(&mut fresh).unwrap_err();
        assert!(matches!(err, TenancyError::NoTenantActive { .. }));
        assert!(fresh.tenant_id.is_none());
    }

    #[tokio::test]
    async fn test_optional_tenant_types_see_shared_rows() {
        let rows = vec![
            Currency {
                code: "EUR".to_string(),
                tenant_id: None
            },
            Currency {
                code: "XTK".to_string(),
                tenant_id: Some(tid("x"))
            },
            Currency {
                code: "YTK".to_string(),
                tenant_id: Some(tid("y"))
            },
        ];

        let shared = ScopeEnforcer::scoped::<Currency>().unwrap().apply(&rows);
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].code, "EUR");

        let for_x = TenantContext::run_as(tenant("x"), async {
            ScopeEnforcer::scoped::<Currency>().unwrap().apply(&rows)
        })
        .await
        .unwrap();
        let codes: Vec<_> = for_x.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["EUR", "XTK"]);
    }

    #[tokio::test]
    async fn test_prepare_insert_and_update_checks() {
        TenantContext::run_as(tenant("x"), async {
            let query = ScopeEnforcer::scoped::<Booking>().unwrap();

            let mut fresh = booking("b", None);
            query.prepare_insert(&mut fresh).unwrap();
            assert_eq!(fresh.tenant_id, Some(tid("x")));

            let moved = booking("b", Some("y"));
            assert!(query.check_update(&fresh, &moved).is_err());
            assert!(query.check_update(&fresh, &fresh.clone()).is_ok());
        })
        .await
        .unwrap();

        let admin = ScopeEnforcer::unscoped::<Booking>(AuditReason::new("import", "system"));
        let mut ownerless = booking("c", None);
        assert!(admin.prepare_insert(&mut ownerless).is_err());
    }
}
