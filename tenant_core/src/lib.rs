//! # Tenancy Core
//!
//! Shared types and traits for the multi-tenant booking backend.
//!
//! This crate provides:
//! - Tenant, alias and principal types with validation at construction
//! - The `TenantDirectory` registry trait implemented by storage backends
//! - The `TenantOwned` trait every tenant-partitioned record implements
//! - An in-process `TenantDirectory` for single-node deployments and tests

pub mod memory;
pub mod traits;
pub mod types;

pub use memory::InMemoryTenantDirectory;
pub use traits::{TenantDirectory, TenantOwned};
pub use types::{
    CustomDomain, Principal, Subdomain, Tenant, TenantId, TenantStatus, UserId, check_custom_domain_placement
};
