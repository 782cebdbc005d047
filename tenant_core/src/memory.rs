//! In-process tenant directory.
//!
//! Used when no database is configured and as the reference implementation
//! in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use errors::{StorageError, TenancyError, TenancyResult};
use parking_lot::RwLock;

use crate::traits::TenantDirectory;
use crate::types::{CustomDomain, Subdomain, Tenant, TenantId, TenantStatus, check_custom_domain_placement};

const BACKEND: &str = "memory";

pub struct InMemoryTenantDirectory {
    tenants: RwLock<HashMap<TenantId, Tenant>>,
    base_domain: Option<String>
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            base_domain: None
        }
    }

    /// Refuse custom domains inside `base_domain` on write.
    pub fn with_base_domain(mut self, base_domain: impl Into<String>) -> Self {
        self.base_domain = Some(base_domain.into());
        self
    }

    /// Reject aliases already held by a different tenant.
    fn check_aliases(&self, tenants: &HashMap<TenantId, Tenant>, candidate: &Tenant) -> TenancyResult<()> {
        let shadowed = match (&candidate.custom_domain, &self.base_domain) {
            (Some(domain), Some(base)) => domain.label_under(base),
            _ => None
        };

        for existing in tenants.values().filter(|t| t.id != candidate.id) {
            if existing.subdomain == candidate.subdomain {
                return Err(TenancyError::AmbiguousAlias {
                    alias: candidate.subdomain.to_string(),
                    existing_tenant_id: existing.id.to_string()
                });
            }
            if let (Some(ours), Some(theirs)) = (&candidate.custom_domain, &existing.custom_domain) {
                if ours == theirs {
                    return Err(TenancyError::AmbiguousAlias {
                        alias: ours.to_string(),
                        existing_tenant_id: existing.id.to_string()
                    });
                }
            }
            if shadowed == Some(existing.subdomain.as_str()) {
                return Err(TenancyError::AmbiguousAlias {
                    alias: candidate.custom_domain.as_ref().map_or_else(String::new, ToString::to_string),
                    existing_tenant_id: existing.id.to_string()
                });
            }
        }

        match &self.base_domain {
            Some(base) => check_custom_domain_placement(candidate, base),
            None => Ok(())
        }
    }
}

impl Default for InMemoryTenantDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn get(&self, id: &TenantId) -> TenancyResult<Option<Tenant>> {
        Ok(self.tenants.read().get(id).cloned())
    }

    async fn find_by_custom_domain(&self, domain: &CustomDomain) -> TenancyResult<Option<Tenant>> {
        Ok(self
            .tenants
            .read()
            .values()
            .find(|t| t.custom_domain.as_ref() == Some(domain))
            .cloned())
    }

    async fn find_by_subdomain(&self, subdomain: &Subdomain) -> TenancyResult<Option<Tenant>> {
        Ok(self
            .tenants
            .read()
            .values()
            .find(|t| &t.subdomain == subdomain)
            .cloned())
    }

    async fn first_available(&self) -> TenancyResult<Option<Tenant>> {
        Ok(self
            .tenants
            .read()
            .values()
            .filter(|t| t.is_active())
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            .cloned())
    }

    async fn upsert(&self, tenant: Tenant) -> TenancyResult<()> {
        let mut tenants = self.tenants.write();
        self.check_aliases(&tenants, &tenant)?;
        tenants.insert(tenant.id.clone(), tenant);
        Ok(())
    }

    async fn set_status(&self, id: &TenantId, status: TenantStatus) -> TenancyResult<Tenant> {
        let mut tenants = self.tenants.write();
        let tenant = tenants.get_mut(id).ok_or_else(|| StorageError::NotFound {
            backend: BACKEND.to_string(),
            id: id.to_string()
        })?;
        tenant.status = status;
        tenant.updated_at = Utc::now();
        Ok(tenant.clone())
    }

    async fn list(&self) -> TenancyResult<Vec<Tenant>> {
        let mut tenants: Vec<Tenant> = self.tenants.read().values().cloned().collect();
        tenants.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tenants)
    }
}
