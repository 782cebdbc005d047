//! Tenant resolution from an inbound request's host and path.
//!
//! Resolution follows one priority order:
//! 1. Strip the port and lower-case the host
//! 2. Tenant-free paths (health, signup, ...) resolve to no tenant
//! 3. Exact custom-domain match
//! 4. Subdomain candidate: final label left after removing `.<base-domain>`
//! 5. `www` is never a tenant
//! 6. Exact subdomain match
//! 7. Optional development fallback, disabled unless configured

use std::sync::Arc;

use config::{DevFallback, TenancyConfig};
use errors::{ResolverError, TenancyResult};
use tenant_core::{CustomDomain, Principal, Subdomain, Tenant, TenantDirectory};
use tracing::{debug, warn};

/// How a tenant was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    CustomDomain,
    Subdomain,
    DevFallback
}

impl MatchedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CustomDomain => "custom_domain",
            Self::Subdomain => "subdomain",
            Self::DevFallback => "dev_fallback"
        }
    }
}

/// Why no tenant was produced. None of these is an error on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoTenantReason {
    TenantFreePath,
    ForeignHost,
    BareBaseDomain,
    ReservedWww,
    UnknownAlias
}

impl NoTenantReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TenantFreePath => "tenant_free_path",
            Self::ForeignHost => "foreign_host",
            Self::BareBaseDomain => "bare_base_domain",
            Self::ReservedWww => "www",
            Self::UnknownAlias => "unknown_alias"
        }
    }
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Tenant {
        tenant: Arc<Tenant>,
        matched_by: MatchedBy
    },
    NoTenant(NoTenantReason)
}

impl Resolution {
    pub fn tenant(&self) -> Option<&Arc<Tenant>> {
        match self {
            Self::Tenant { tenant, .. } => Some(tenant),
            Self::NoTenant(_) => None
        }
    }

    fn outcome_label(&self) -> &'static str {
        match self {
            Self::Tenant { matched_by, .. } => matched_by.as_str(),
            Self::NoTenant(reason) => reason.as_str()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverSettings {
    pub base_domain: String,
    pub tenant_free_paths: Vec<String>,
    pub dev_fallback: DevFallback
}

impl From<&TenancyConfig> for ResolverSettings {
    fn from(config: &TenancyConfig) -> Self {
        Self {
            base_domain: config.base_domain.clone(),
            tenant_free_paths: config.tenant_free_paths.clone(),
            dev_fallback: config.dev_fallback
        }
    }
}

enum Candidate<'a> {
    Label(&'a str),
    BareBaseDomain,
    Foreign
}

/// The single resolver used by the HTTP boundary and internal tooling.
pub struct TenantResolver {
    directory: Arc<dyn TenantDirectory>,
    base_domain: String,
    base_suffix: String,
    tenant_free_paths: Vec<String>,
    dev_fallback: DevFallback
}

impl TenantResolver {
    pub fn new(directory: Arc<dyn TenantDirectory>, settings: ResolverSettings) -> Self {
        let base_domain = settings
            .base_domain
            .trim()
            .trim_matches('.')
            .to_ascii_lowercase();
        let tenant_free_paths = settings
            .tenant_free_paths
            .iter()
            .map(|p| p.trim_end_matches('/').to_string())
            .collect();

        if settings.dev_fallback != DevFallback::Disabled {
            warn!(fallback = ?settings.dev_fallback, "Tenant resolver running with development fallback");
        }

        Self {
            base_suffix: format!(".{base_domain}"),
            base_domain,
            directory,
            tenant_free_paths,
            dev_fallback: settings.dev_fallback
        }
    }

    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    /// Resolve `host` and `path` to a tenant.
    ///
    /// `principal` is only consulted by the `principal_home` development
    /// fallback.
    pub async fn resolve(
        &self,
        host: &str,
        path: &str,
        principal: Option<&Principal>
    ) -> TenancyResult<Resolution> {
        let host = normalize_host(host)?;
        let resolution = self.resolve_normalized(&host, path, principal).await?;

        debug!(host = %host, path, outcome = resolution.outcome_label(), "Resolved tenant");
        metrics::counter!("tenancy_resolutions_total", "outcome" => resolution.outcome_label())
            .increment(1);

        Ok(resolution)
    }

    async fn resolve_normalized(
        &self,
        host: &str,
        path: &str,
        principal: Option<&Principal>
    ) -> TenancyResult<Resolution> {
        if self.is_tenant_free(path) {
            return Ok(Resolution::NoTenant(NoTenantReason::TenantFreePath));
        }

        if let Ok(domain) = CustomDomain::parse(host) {
            if let Some(tenant) = self.directory.find_by_custom_domain(&domain).await? {
                return Ok(Resolution::Tenant {
                    tenant: Arc::new(tenant),
                    matched_by: MatchedBy::CustomDomain
                });
            }
        }

        let reason = match self.subdomain_candidate(host) {
            Candidate::Foreign => NoTenantReason::ForeignHost,
            Candidate::BareBaseDomain => NoTenantReason::BareBaseDomain,
            Candidate::Label("www") => NoTenantReason::ReservedWww,
            Candidate::Label(label) => match Subdomain::parse(label) {
                Ok(subdomain) => match self.directory.find_by_subdomain(&subdomain).await? {
                    Some(tenant) => {
                        return Ok(Resolution::Tenant {
                            tenant: Arc::new(tenant),
                            matched_by: MatchedBy::Subdomain
                        });
                    }
                    None => NoTenantReason::UnknownAlias
                },
                Err(_) => NoTenantReason::UnknownAlias
            }
        };

        self.fallback(reason, principal).await
    }

    async fn fallback(
        &self,
        reason: NoTenantReason,
        principal: Option<&Principal>
    ) -> TenancyResult<Resolution> {
        let tenant = match self.dev_fallback {
            DevFallback::Disabled => None,
            DevFallback::FirstAvailable => self.directory.first_available().await?,
            DevFallback::PrincipalHome => match principal {
                Some(principal) => self.directory.get(&principal.home_tenant_id).await?,
                None => None
            }
        };

        match tenant {
            Some(tenant) => {
                warn!(
                    tenant_id = %tenant.id,
                    unmatched = reason.as_str(),
                    "Development fallback substituted a tenant"
                );
                Ok(Resolution::Tenant {
                    tenant: Arc::new(tenant),
                    matched_by: MatchedBy::DevFallback
                })
            }
            None => Ok(Resolution::NoTenant(reason))
        }
    }

    /// Prefix match on path-segment boundaries: `/health` covers
    /// `/health/live` but not `/healthz`.
    pub fn is_tenant_free(&self, path: &str) -> bool {
        self.tenant_free_paths.iter().any(|prefix| {
            if prefix.is_empty() {
                return path == "/";
            }
            path == prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    fn subdomain_candidate<'a>(&self, host: &'a str) -> Candidate<'a> {
        if host == self.base_domain {
            return Candidate::BareBaseDomain;
        }
        match host.strip_suffix(self.base_suffix.as_str()) {
            Some(rest) => match rest.rsplit('.').next() {
                Some(label) if !label.is_empty() => Candidate::Label(label),
                _ => Candidate::Foreign
            },
            None => Candidate::Foreign
        }
    }
}

/// Strip an optional port, drop a trailing root dot and lower-case.
///
/// Bracketed IPv6 literals are accepted and returned with their brackets;
/// they never match a tenant alias.
pub fn normalize_host(raw: &str) -> Result<String, ResolverError> {
    let malformed = |reason: &str| ResolverError::MalformedHost {
        host: raw.to_string(),
        reason: reason.to_string()
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(malformed("empty host"));
    }

    if let Some(rest) = trimmed.strip_prefix('[') {
        let (literal, after) = rest
            .split_once(']')
            .ok_or_else(|| malformed("unterminated IPv6 literal"))?;
        if !after.is_empty() {
            let port = after
                .strip_prefix(':')
                .ok_or_else(|| malformed("unexpected characters after IPv6 literal"))?;
            validate_port(port).map_err(|()| malformed("invalid port"))?;
        }
        if literal.is_empty() || !literal.chars().all(|c| c.is_ascii_hexdigit() || c == ':' || c == '.')
        {
            return Err(malformed("invalid IPv6 literal"));
        }
        return Ok(format!("[{}]", literal.to_ascii_lowercase()));
    }

    let name = match trimmed.split_once(':') {
        Some((name, port)) => {
            validate_port(port).map_err(|()| malformed("invalid port"))?;
            name
        }
        None => trimmed
    };

    let name = name.strip_suffix('.').unwrap_or(name).to_ascii_lowercase();
    if name.is_empty() || name.len() > 253 {
        return Err(malformed("invalid host length"));
    }
    if !name
        .split('.')
        .all(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'))
    {
        return Err(malformed("invalid host name"));
    }

    Ok(name)
}

fn validate_port(port: &str) -> Result<(), ()> {
    if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) && port.parse::<u16>().is_ok() {
        Ok(())
    } else {
        Err(())
    }
}
