//! In-memory repository for tenant-owned records.
//!
//! Every operation takes a [`ScopedQuery`]; there is no method that reads or
//! writes without one. Rows outside the query are indistinguishable from
//! rows that do not exist.

use context::ScopedQuery;
use errors::{StorageError, TenancyResult};
use parking_lot::RwLock;
use tenant_core::TenantOwned;
use tracing::debug;

const BACKEND: &str = "memory";

pub struct InMemoryRecords<R> {
    rows: RwLock<Vec<R>>
}

impl<R: TenantOwned> Default for InMemoryRecords<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: TenantOwned> InMemoryRecords<R> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new())
        }
    }

    /// Admitted rows in insertion order.
    pub fn list(&self, scope: &ScopedQuery<R>) -> Vec<R> {
        scope.apply(self.rows.read().iter())
    }

    pub fn get(&self, scope: &ScopedQuery<R>, id: &str) -> Option<R> {
        self.rows
            .read()
            .iter()
            .find(|row| row.record_id() == id && scope.admits(row))
            .cloned()
    }

    pub fn count(&self, scope: &ScopedQuery<R>) -> usize {
        self.rows.read().iter().filter(|row| scope.admits(row)).count()
    }

    /// Insert `record`, filling its tenant from the scope when unset.
    pub fn insert(&self, scope: &ScopedQuery<R>, mut record: R) -> TenancyResult<R> {
        scope.prepare_insert(&mut record)?;

        let mut rows = self.rows.write();
        let duplicate = rows
            .iter()
            .any(|row| row.record_id() == record.record_id() && row.tenant_id() == record.tenant_id());
        if duplicate {
            return Err(StorageError::Conflict {
                backend: BACKEND.to_string(),
                id: record.record_id().to_string()
            }
            .into());
        }

        debug!(record_type = R::RECORD_TYPE, record_id = record.record_id(), "Inserted record");
        rows.push(record.clone());
        Ok(record)
    }

    /// Replace an admitted row with the same id.
    pub fn update(&self, scope: &ScopedQuery<R>, record: R) -> TenancyResult<R> {
        let mut rows = self.rows.write();
        let Some(existing) = rows
            .iter_mut()
            .find(|row| row.record_id() == record.record_id() && scope.admits(row))
        else {
            return Err(StorageError::NotFound {
                backend: BACKEND.to_string(),
                id: record.record_id().to_string()
            }
            .into());
        };

        scope.check_update(existing, &record)?;
        *existing = record.clone();
        Ok(record)
    }

    /// Delete an admitted row. Returns whether anything was removed.
    pub fn delete(&self, scope: &ScopedQuery<R>, id: &str) -> bool {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|row| !(row.record_id() == id && scope.admits(row)));
        before != rows.len()
    }
}
