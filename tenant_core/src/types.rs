use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use errors::{InactiveReason, TenancyError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,100}$").expect("valid id pattern"));

static LABEL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("valid label pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: String) -> Option<Self> {
        if ID_PATTERN.is_match(&id) {
            Some(Self(id))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TenantId {
    type Err = TenancyError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
            .ok_or_else(|| TenancyError::validation("tenant_id", format!("invalid tenant id {s:?}")))
    }
}

impl TryFrom<String> for TenantId {
    type Error = TenancyError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(id: String) -> Option<Self> {
        if ID_PATTERN.is_match(&id) {
            Some(Self(id))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = TenancyError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
            .ok_or_else(|| TenancyError::validation("user_id", format!("invalid user id {s:?}")))
    }
}

impl TryFrom<String> for UserId {
    type Error = TenancyError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// Trim, lower-case and drop a trailing root dot.
fn normalize_alias(raw: &str) -> String {
    raw.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// A single DNS label identifying a tenant under the base domain.
///
/// Always stored lower-cased, so equality is case-insensitive by
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Subdomain(String);

impl Subdomain {
    pub fn parse(raw: &str) -> Result<Self, TenancyError> {
        let label = normalize_alias(raw);
        if LABEL_PATTERN.is_match(&label) {
            Ok(Self(label))
        } else {
            Err(TenancyError::validation(
                "subdomain",
                format!("{raw:?} is not a valid DNS label")
            ))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Subdomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Subdomain {
    type Error = TenancyError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Subdomain> for String {
    fn from(value: Subdomain) -> Self {
        value.0
    }
}

/// A fully qualified host name a tenant has pointed at the application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct CustomDomain(String);

impl CustomDomain {
    pub fn parse(raw: &str) -> Result<Self, TenancyError> {
        let host = normalize_alias(raw);
        let labels: Vec<&str> = host.split('.').collect();
        if host.len() > 253 || labels.len() < 2 || !labels.iter().all(|l| LABEL_PATTERN.is_match(l))
        {
            return Err(TenancyError::validation(
                "custom_domain",
                format!("{raw:?} is not a valid host name")
            ));
        }
        Ok(Self(host))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The label directly left of `base_domain`, i.e. the subdomain a
    /// request for this host would resolve through. `None` when the domain
    /// lies outside `base_domain`; `Some("")` for the base domain itself.
    pub fn label_under<'a>(&'a self, base_domain: &str) -> Option<&'a str> {
        let base = base_domain.trim().trim_matches('.').to_ascii_lowercase();
        if self.0 == base {
            return Some("");
        }
        let rest = self.0.strip_suffix(base.as_str())?.strip_suffix('.')?;
        rest.rsplit('.').next()
    }

    pub fn is_within(&self, base_domain: &str) -> bool {
        self.label_under(base_domain).is_some()
    }
}

/// Custom domains must live outside the platform's base domain, otherwise
/// they would shadow a subdomain host through custom-domain priority.
pub fn check_custom_domain_placement(tenant: &Tenant, base_domain: &str) -> Result<(), TenancyError> {
    match &tenant.custom_domain {
        Some(domain) if domain.is_within(base_domain) => Err(TenancyError::validation(
            "custom_domain",
            format!("{domain} is inside the platform domain {base_domain}")
        )),
        _ => Ok(())
    }
}

impl std::fmt::Display for CustomDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CustomDomain {
    type Error = TenancyError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CustomDomain> for String {
    fn from(value: CustomDomain) -> Self {
        value.0
    }
}

/// Account lifecycle status. Tenants are never hard-deleted; they move
/// between these states instead.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Trialing,
    Pending,
    Suspended,
    Cancelled,
    Expired
}

impl TenantStatus {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }

    /// The rejection reason for a status that may not serve requests.
    pub fn inactive_reason(self) -> Option<InactiveReason> {
        match self {
            Self::Active | Self::Trialing => None,
            Self::Suspended => Some(InactiveReason::Suspended),
            Self::Cancelled => Some(InactiveReason::Cancelled),
            Self::Expired => Some(InactiveReason::Expired),
            Self::Pending => Some(InactiveReason::Inactive)
        }
    }
}

/// A company account. All business data is partitioned by tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub subdomain: Subdomain,
    pub custom_domain: Option<CustomDomain>,
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>
}

impl Tenant {
    pub fn new(id: TenantId, name: impl Into<String>, subdomain: Subdomain) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            subdomain,
            custom_domain: None,
            status: TenantStatus::Active,
            created_at: now,
            updated_at: now
        }
    }

    pub fn with_custom_domain(mut self, domain: CustomDomain) -> Self {
        self.custom_domain = Some(domain);
        self
    }

    pub fn with_status(mut self, status: TenantStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// The authenticated actor, as asserted by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub home_tenant_id: TenantId,
    pub display_name: Option<String>
}

impl Principal {
    pub fn new(user_id: UserId, home_tenant_id: TenantId) -> Self {
        Self {
            user_id,
            home_tenant_id,
            display_name: None
        }
    }

    pub fn belongs_to(&self, tenant_id: &TenantId) -> bool {
        &self.home_tenant_id == tenant_id
    }
}
