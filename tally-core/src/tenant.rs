//! Multi-tenant types for Tally.
//!
//! A signed-in identity may act within several companies. Each one is a
//! [`Tenant`]; all of them together form the identity's [`TenantSet`].

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Backend identifier of a company.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What the identity is allowed to do inside a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Owner,
    Admin,
    SuperAdmin,
}

impl Role {
    /// Lenient parse of the backend's `admin_type` field.
    pub fn parse(raw: &str) -> Option<Self> {
        let norm: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_lowercase();
        match norm.as_str() {
            "owner" => Some(Role::Owner),
            "admin" => Some(Role::Admin),
            "superadmin" => Some(Role::SuperAdmin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "Owner",
            Role::Admin => "Admin",
            Role::SuperAdmin => "SuperAdmin",
        }
    }

    /// Owners list their companies; admins are resolved through their employee record.
    pub fn is_owner(&self) -> bool {
        matches!(self, Role::Owner)
    }
}

/// How often a tenant wants timesheet reports e-mailed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Frequency {
    Daily,
    Weekly,
    BiWeekly,
    SemiMonthly,
    Monthly,
}

impl Frequency {
    pub fn parse(raw: &str) -> Option<Self> {
        let norm: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_lowercase();
        match norm.as_str() {
            "daily" => Some(Frequency::Daily),
            "weekly" => Some(Frequency::Weekly),
            "biweekly" => Some(Frequency::BiWeekly),
            "semimonthly" | "halfmonthly" | "bimonthly" => Some(Frequency::SemiMonthly),
            "monthly" => Some(Frequency::Monthly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingAddress {
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl BillingAddress {
    pub fn is_empty(&self) -> bool {
        self == &BillingAddress::default()
    }
}

/// One company the identity may act within.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: TenantId,
    pub display_name: String,
    pub role: Role,
    pub report_frequencies: BTreeSet<Frequency>,
    pub employee_count: u32,
    pub device_count: u32,
    pub billing_address: Option<BillingAddress>,
    pub logo_url: Option<String>,
}

impl Tenant {
    pub fn new(tenant_id: impl Into<TenantId>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            display_name: display_name.into(),
            role,
            report_frequencies: BTreeSet::new(),
            employee_count: 0,
            device_count: 0,
            billing_address: None,
            logo_url: None,
        }
    }
}

/// The compact form written to durable storage so a reload can restore the
/// active tenant before the tenant set has been fetched again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSummary {
    #[serde(rename = "companyID")]
    pub tenant_id: TenantId,
    #[serde(rename = "companyName")]
    pub display_name: String,
    #[serde(rename = "adminType")]
    pub role: Role,
}

impl From<&Tenant> for TenantSummary {
    fn from(t: &Tenant) -> Self {
        Self {
            tenant_id: t.tenant_id.clone(),
            display_name: t.display_name.clone(),
            role: t.role,
        }
    }
}

/// Ordered collection of tenants reachable by the current identity.
///
/// Membership only changes by replacing the whole set on reload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSet {
    tenants: Vec<Tenant>,
}

impl TenantSet {
    /// Builds a set, keeping the first occurrence of a duplicated id.
    pub fn new(tenants: Vec<Tenant>) -> Self {
        let mut seen = BTreeSet::new();
        let tenants = tenants
            .into_iter()
            .filter(|t| !t.tenant_id.is_blank() && seen.insert(t.tenant_id.clone()))
            .collect();
        Self { tenants }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &TenantId) -> Option<&Tenant> {
        self.tenants.iter().find(|t| &t.tenant_id == id)
    }

    pub fn contains(&self, id: &TenantId) -> bool {
        self.get(id).is_some()
    }

    pub fn first(&self) -> Option<&Tenant> {
        self.tenants.first()
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tenant> {
        self.tenants.iter()
    }

    pub fn ids(&self) -> Vec<TenantId> {
        self.tenants.iter().map(|t| t.tenant_id.clone()).collect()
    }
}

/// Kind of per-tenant data held in the tenant cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataKind {
    Devices,
    Employees,
    ReportSettings,
    Custom(String),
}

impl DataKind {
    pub fn custom(name: impl Into<String>) -> Self {
        DataKind::Custom(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            DataKind::Devices => "devices",
            DataKind::Employees => "employees",
            DataKind::ReportSettings => "report-settings",
            DataKind::Custom(name) => name,
        }
    }

    /// Kinds warmed up right after a tenant switch.
    pub fn preloaded() -> [DataKind; 3] {
        [DataKind::Devices, DataKind::Employees, DataKind::ReportSettings]
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_is_lenient() {
        assert_eq!(Role::parse("super_admin"), Some(Role::SuperAdmin));
        assert_eq!(Role::parse(" Owner "), Some(Role::Owner));
        assert_eq!(Role::parse("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse("employee"), None);
    }

    #[test]
    fn tenant_set_drops_duplicates_and_blank_ids() {
        let set = TenantSet::new(vec![
            Tenant::new("t1", "First", Role::Owner),
            Tenant::new("", "Blank", Role::Owner),
            Tenant::new("t1", "Dup", Role::Admin),
            Tenant::new("t2", "Second", Role::Admin),
        ]);
        assert_eq!(set.ids(), vec![TenantId::from("t1"), TenantId::from("t2")]);
        assert_eq!(set.get(&"t1".into()).map(|t| t.display_name.as_str()), Some("First"));
    }

    #[test]
    fn summary_uses_storage_field_names() {
        let summary = TenantSummary::from(&Tenant::new("t9", "Acme", Role::SuperAdmin));
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["companyID"], "t9");
        assert_eq!(json["companyName"], "Acme");
        assert_eq!(json["adminType"], "SuperAdmin");
    }
}
