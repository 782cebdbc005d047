//! Access verification for a resolved tenant.
//!
//! A request moves through [`GateState`]:
//!
//! ```text
//! Unresolved -> Resolved(tenant) | NoTenant
//! Resolved   -> Active | Rejected(reason)
//! Active     -> Authorized | Forbidden
//! ```
//!
//! Only `Authorized` may proceed into business logic. A principal from a
//! different tenant is `Forbidden` even when the tenant is also inactive, so
//! non-members never learn another company's account status.

use std::sync::Arc;

use errors::{ContextError, InactiveReason, TenancyError, TenancyResult};
use tenant_core::{Principal, Tenant, UserId};
use tracing::{debug, warn};

use crate::resolver::{NoTenantReason, Resolution};

#[derive(Debug, Clone, Copy, Default)]
pub struct AccessVerifier;

impl AccessVerifier {
    pub fn new() -> Self {
        Self
    }

    pub fn verify_tenant_active(&self, tenant: &Tenant) -> Result<(), InactiveReason> {
        match tenant.status.inactive_reason() {
            None => Ok(()),
            Some(reason) => {
                warn!(tenant_id = %tenant.id, status = %tenant.status, "Tenant is not active");
                metrics::counter!("tenancy_rejections_total", "reason" => reason.as_str())
                    .increment(1);
                Err(reason)
            }
        }
    }

    /// The principal's home tenant must be the resolved tenant. Never
    /// switches the request to the principal's own tenant.
    pub fn verify_principal_belongs(&self, principal: &Principal, tenant: &Tenant) -> TenancyResult<()> {
        if principal.belongs_to(&tenant.id) {
            return Ok(());
        }
        warn!(
            user_id = %principal.user_id,
            home_tenant_id = %principal.home_tenant_id,
            tenant_id = %tenant.id,
            "Principal attempted cross-tenant access"
        );
        metrics::counter!("tenancy_rejections_total", "reason" => "tenant_mismatch").increment(1);
        Err(TenancyError::TenantMismatch {
            user_id: principal.user_id.to_string(),
            tenant_id: tenant.id.to_string()
        })
    }

    /// Run the full gate for an already-resolved tenant.
    pub fn authorize(&self, tenant: Arc<Tenant>, principal: &Principal) -> TenancyResult<Authorized> {
        let host = tenant.subdomain.to_string();
        TenantGate::resolved(*self, tenant)
            .verify_active()
            .verify_principal(principal)
            .finish(&host)
    }
}

/// A tenant the principal may act within.
#[derive(Debug, Clone)]
pub struct Authorized {
    pub tenant: Arc<Tenant>,
    pub principal: Principal
}

#[derive(Debug, Clone)]
pub enum GateState {
    Unresolved,
    NoTenant(NoTenantReason),
    Resolved(Arc<Tenant>),
    Active(Arc<Tenant>),
    Rejected {
        tenant: Arc<Tenant>,
        reason: InactiveReason
    },
    Authorized(Authorized),
    Forbidden {
        tenant: Arc<Tenant>,
        user_id: UserId
    }
}

impl GateState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::NoTenant(_) => "no_tenant",
            Self::Resolved(_) => "resolved",
            Self::Active(_) => "active",
            Self::Rejected { .. } => "rejected",
            Self::Authorized(_) => "authorized",
            Self::Forbidden { .. } => "forbidden"
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NoTenant(_) | Self::Rejected { .. } | Self::Authorized(_) | Self::Forbidden { .. }
        )
    }
}

/// Drives one request through the gate. Transitions called out of order
/// leave the state unchanged, so a skipped step surfaces in [`finish`].
///
/// [`finish`]: TenantGate::finish
#[derive(Debug)]
pub struct TenantGate {
    verifier: AccessVerifier,
    state: GateState
}

impl TenantGate {
    pub fn new(verifier: AccessVerifier) -> Self {
        Self {
            verifier,
            state: GateState::Unresolved
        }
    }

    /// Start from a tenant resolved elsewhere, e.g. a job payload.
    pub fn resolved(verifier: AccessVerifier, tenant: Arc<Tenant>) -> Self {
        Self {
            verifier,
            state: GateState::Resolved(tenant)
        }
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    pub fn resolve(mut self, resolution: Resolution) -> Self {
        if let GateState::Unresolved = self.state {
            self.state = match resolution {
                Resolution::Tenant { tenant, .. } => GateState::Resolved(tenant),
                Resolution::NoTenant(reason) => GateState::NoTenant(reason)
            };
        } else {
            debug!(state = self.state.name(), "Ignoring resolve outside the unresolved state");
        }
        self
    }

    pub fn verify_active(mut self) -> Self {
        self.state = match self.state {
            GateState::Resolved(tenant) => match self.verifier.verify_tenant_active(&tenant) {
                Ok(()) => GateState::Active(tenant),
                Err(reason) => GateState::Rejected { tenant, reason }
            },
            other => {
                debug!(state = other.name(), "Ignoring verify_active outside the resolved state");
                other
            }
        };
        self
    }

    pub fn verify_principal(mut self, principal: &Principal) -> Self {
        self.state = match self.state {
            GateState::Active(tenant) => {
                match self.verifier.verify_principal_belongs(principal, &tenant) {
                    Ok(()) => GateState::Authorized(Authorized {
                        tenant,
                        principal: principal.clone()
                    }),
                    Err(_) => GateState::Forbidden {
                        tenant,
                        user_id: principal.user_id.clone()
                    }
                }
            }
            GateState::Rejected { tenant, reason } => {
                if self.verifier.verify_principal_belongs(principal, &tenant).is_ok() {
                    GateState::Rejected { tenant, reason }
                } else {
                    GateState::Forbidden {
                        tenant,
                        user_id: principal.user_id.clone()
                    }
                }
            }
            other => {
                debug!(state = other.name(), "Ignoring verify_principal outside the active state");
                other
            }
        };
        self
    }

    /// Convert the final state into the outcome for the boundary.
    pub fn finish(self, host: &str) -> TenancyResult<Authorized> {
        match self.state {
            GateState::Authorized(authorized) => Ok(authorized),
            GateState::NoTenant(_) => Err(TenancyError::TenantNotFound {
                host: host.to_string()
            }),
            GateState::Rejected { tenant, reason } => Err(TenancyError::TenantInactive {
                tenant_id: tenant.id.to_string(),
                reason
            }),
            GateState::Forbidden { tenant, user_id } => Err(TenancyError::TenantMismatch {
                user_id: user_id.to_string(),
                tenant_id: tenant.id.to_string()
            }),
            other => Err(ContextError::IncompleteGate {
                state: other.name().to_string()
            }
            .into())
        }
    }
}
