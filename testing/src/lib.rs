//! Shared test fixtures for the booking backend workspace.
//!
//! - A single PostgreSQL testcontainer per test process, lazily started and
//!   skipped when Docker is unavailable
//! - Unique ids so tests sharing that database never collide
//! - Tenant builders and a seeded in-memory directory

mod fixtures;

pub use fixtures::*;
