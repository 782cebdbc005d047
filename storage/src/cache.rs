//! Read-through alias cache in front of a [`TenantDirectory`].
//!
//! Entries expire after the configured TTL and the map never holds more than
//! `max_entries`. Every write through the cache evicts all entries that point
//! at the written tenant and every key for its new aliases, so an alias never
//! keeps resolving to a previous owner.
//!
//! Writes also bump a generation counter. A lookup that started before a
//! write finishes with whatever it read, but its result is not cached.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use config::CacheConfig;
use dashmap::DashMap;
use errors::TenancyResult;
use parking_lot::RwLock;
use tenant_core::{CustomDomain, Subdomain, Tenant, TenantDirectory, TenantId, TenantStatus};
use tracing::debug;

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Id(TenantId),
    Subdomain(Subdomain),
    CustomDomain(CustomDomain)
}

#[derive(Debug, Clone)]
struct CacheEntry {
    tenant: Option<Tenant>,
    created_at: Instant
}

pub struct CachedTenantDirectory {
    inner: Arc<dyn TenantDirectory>,
    cache: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
    generation: RwLock<u64>
}

impl CachedTenantDirectory {
    pub fn new(inner: Arc<dyn TenantDirectory>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
            ttl,
            max_entries: DEFAULT_MAX_ENTRIES,
            generation: RwLock::new(0)
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn from_config(inner: Arc<dyn TenantDirectory>, config: &CacheConfig) -> Self {
        Self::new(inner, Duration::from_secs(config.ttl_seconds)).with_max_entries(config.max_entries)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&self) {
        let mut generation = self.generation.write();
        *generation += 1;
        self.cache.clear();
    }

    fn lookup(&self, key: &CacheKey) -> Option<Option<Tenant>> {
        let hit = self.cache.get(key).and_then(|entry| {
            (entry.created_at.elapsed() < self.ttl).then(|| entry.tenant.clone())
        });
        if hit.is_none() {
            self.cache.remove_if(key, |_, entry| entry.created_at.elapsed() >= self.ttl);
        }
        hit
    }

    /// Cache `tenant` under `key` unless a write happened since `observed`
    /// or the map is full of live positive entries.
    fn store(&self, key: CacheKey, tenant: Option<Tenant>, observed: u64) {
        let generation = self.generation.read();
        if *generation != observed {
            metrics::counter!("tenancy_alias_cache_total", "result" => "stale").increment(1);
            return;
        }
        if self.cache.len() >= self.max_entries && !self.make_room() {
            metrics::counter!("tenancy_alias_cache_total", "result" => "full").increment(1);
            return;
        }
        self.cache.insert(
            key,
            CacheEntry {
                tenant,
                created_at: Instant::now()
            }
        );
    }

    /// Drop expired entries, then cached misses. Hits for known tenants go
    /// last because they are bounded by the directory itself.
    fn make_room(&self) -> bool {
        let before = self.cache.len();
        self.cache.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        if self.cache.len() >= self.max_entries {
            self.cache.retain(|_, entry| entry.tenant.is_some());
        }
        debug!(
            evicted = before.saturating_sub(self.cache.len()),
            max_entries = self.max_entries,
            "Alias cache reached capacity"
        );
        self.cache.len() < self.max_entries
    }

    async fn read_through<F, Fut>(&self, key: CacheKey, load: F) -> TenancyResult<Option<Tenant>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = TenancyResult<Option<Tenant>>>
    {
        if let Some(cached) = self.lookup(&key) {
            metrics::counter!("tenancy_alias_cache_total", "result" => "hit").increment(1);
            return Ok(cached);
        }
        metrics::counter!("tenancy_alias_cache_total", "result" => "miss").increment(1);
        let observed = *self.generation.read();
        let loaded = load().await?;
        self.store(key, loaded.clone(), observed);
        Ok(loaded)
    }

    /// Drop everything that refers to `tenant` under any alias, plus the keys
    /// for the aliases it holds now.
    fn invalidate(&self, tenant: &Tenant) {
        let mut generation = self.generation.write();
        *generation += 1;

        let before = self.cache.len();
        self.cache.retain(|_, entry| {
            entry
                .tenant
                .as_ref()
                .is_none_or(|cached| cached.id != tenant.id)
        });
        self.cache.remove(&CacheKey::Id(tenant.id.clone()));
        self.cache.remove(&CacheKey::Subdomain(tenant.subdomain.clone()));
        if let Some(domain) = &tenant.custom_domain {
            self.cache.remove(&CacheKey::CustomDomain(domain.clone()));
        }
        debug!(
            tenant_id = %tenant.id,
            evicted = before.saturating_sub(self.cache.len()),
            "Invalidated alias cache"
        );
    }
}

#[async_trait]
impl TenantDirectory for CachedTenantDirectory {
    async fn get(&self, id: &TenantId) -> TenancyResult<Option<Tenant>> {
        self.read_through(CacheKey::Id(id.clone()), || self.inner.get(id))
            .await
    }

    async fn find_by_custom_domain(&self, domain: &CustomDomain) -> TenancyResult<Option<Tenant>> {
        self.read_through(CacheKey::CustomDomain(domain.clone()), || {
            self.inner.find_by_custom_domain(domain)
        })
        .await
    }

    async fn find_by_subdomain(&self, subdomain: &Subdomain) -> TenancyResult<Option<Tenant>> {
        self.read_through(CacheKey::Subdomain(subdomain.clone()), || {
            self.inner.find_by_subdomain(subdomain)
        })
        .await
    }

    async fn first_available(&self) -> TenancyResult<Option<Tenant>> {
        self.inner.first_available().await
    }

    async fn upsert(&self, tenant: Tenant) -> TenancyResult<()> {
        let previous = self.inner.get(&tenant.id).await?;
        self.inner.upsert(tenant.clone()).await?;
        if let Some(previous) = previous {
            self.invalidate(&previous);
        }
        self.invalidate(&tenant);
        Ok(())
    }

    async fn set_status(&self, id: &TenantId, status: TenantStatus) -> TenancyResult<Tenant> {
        let updated = self.inner.set_status(id, status).await?;
        self.invalidate(&updated);
        Ok(updated)
    }

    async fn list(&self) -> TenancyResult<Vec<Tenant>> {
        self.inner.list().await
    }
}
