//! # Tenancy Errors
//!
//! Error taxonomy for the tenant isolation core.
//!
//! Follows the workspace conventions:
//! - Uses `thiserror` for structured error definitions
//! - Named fields on every variant, never positional
//! - Boundary crates map these onto transport-level responses

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a tenant is not allowed to serve requests.
///
/// Each reason carries a distinct user-facing message. `Inactive` covers any
/// status that is neither active nor one of the three named terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InactiveReason {
    Suspended,
    Cancelled,
    Expired,
    Inactive
}

impl InactiveReason {
    pub fn message(self) -> &'static str {
        match self {
            Self::Suspended => {
                "This company account has been suspended. Please contact support to restore access."
            }
            Self::Cancelled => "This company account has been cancelled.",
            Self::Expired => {
                "This company's subscription has expired. Please renew the subscription to continue."
            }
            Self::Inactive => "This company account is not active."
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Suspended => "suspended",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Inactive => "inactive"
        }
    }
}

impl std::fmt::Display for InactiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Top-level error for tenant resolution, verification and scoping.
#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("Company not found for host {host}")]
    TenantNotFound { host: String },

    #[error("{reason}")]
    TenantInactive {
        tenant_id: String,
        reason: InactiveReason
    },

    #[error("Principal {user_id} does not belong to tenant {tenant_id}")]
    TenantMismatch { user_id: String, tenant_id: String },

    #[error("No tenant is active for scoped access to {record_type}")]
    NoTenantActive { record_type: String },

    #[error("Alias {alias} is already claimed by tenant {existing_tenant_id}")]
    AmbiguousAlias {
        alias: String,
        existing_tenant_id: String
    },

    #[error("Record {record_type}:{record_id} belongs to tenant {record_tenant_id}, not {active_tenant_id}")]
    CrossTenantWrite {
        record_type: String,
        record_id: String,
        record_tenant_id: String,
        active_tenant_id: String
    },

    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Storage(#[from] StorageError)
}

impl TenancyError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into()
        }
    }

    /// Conditions that indicate a broken integration rather than bad input.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::NoTenantActive { .. } | Self::CrossTenantWrite { .. } | Self::Context(_)
        )
    }
}

/// Resolver-level errors for malformed request input.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("Malformed host {host:?}: {reason}")]
    MalformedHost { host: String, reason: String }
}

/// Execution context errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("No tenant execution scope is established for this task")]
    NoExecutionScope,

    #[error("Tenant guard from execution {guard_execution} released in execution {current_execution}")]
    ForeignExecution {
        guard_execution: u64,
        current_execution: u64
    },

    #[error("Tenant guard {generation} was already released")]
    StaleGuard { generation: u64 },

    #[error("Tenant gate finished in non-terminal state {state}")]
    IncompleteGate { state: String }
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Connection to {backend} failed: {reason}")]
    ConnectionError { backend: String, reason: String },

    #[error("Query on {backend} failed: {reason}")]
    QueryError { backend: String, reason: String },

    #[error("Serialization error: {error_type} - {reason}")]
    SerializationError { error_type: String, reason: String },

    #[error("Not found on {backend}:{id}")]
    NotFound { backend: String, id: String },

    #[error("Record {id} already exists on {backend}")]
    Conflict { backend: String, id: String }
}

pub type TenancyResult<T> = Result<T, TenancyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inactive_reasons_have_distinct_messages() {
        let reasons = [
            InactiveReason::Suspended,
            InactiveReason::Cancelled,
            InactiveReason::Expired,
            InactiveReason::Inactive
        ];
        let messages: std::collections::HashSet<_> =
            reasons.iter().map(|r| r.message()).collect();
        assert_eq!(messages.len(), reasons.len());
    }

    #[test]
    fn test_tenant_inactive_displays_reason_message() {
        let err = TenancyError::TenantInactive {
            tenant_id: "acme".to_string(),
            reason: InactiveReason::Suspended
        };
        assert!(err.to_string().contains("suspended"));
    }

    #[test]
    fn test_invariant_violations() {
        assert!(
            TenancyError::NoTenantActive {
                record_type: "products".to_string()
            }
            .is_invariant_violation()
        );
        assert!(
            !TenancyError::TenantNotFound {
                host: "x.example.com".to_string()
            }
            .is_invariant_violation()
        );
    }
}
