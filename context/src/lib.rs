//! Execution-scoped tenant context for the booking backend.
//!
//! - [`TenantResolver`] maps an inbound host and path to a tenant
//! - [`TenantContext`] holds the active tenant for one execution
//! - [`AccessVerifier`] and [`TenantGate`] decide whether a principal may act
//! - [`ScopeEnforcer`] filters tenant-owned data by the active tenant
//! - [`JobRunner`] re-establishes the tenant for background work

pub mod execution;
pub mod jobs;
pub mod resolver;
pub mod scope;
pub mod verifier;

pub use execution::{TenantContext, TenantGuard};
pub use jobs::{JobError, JobHandler, JobQueue, JobRunner, TenantJob};
pub use resolver::{MatchedBy, NoTenantReason, Resolution, ResolverSettings, TenantResolver, normalize_host};
pub use scope::{AuditReason, ScopeEnforcer, ScopedQuery, TenantFilter};
pub use verifier::{AccessVerifier, Authorized, GateState, TenantGate};
