//! Wire shapes → domain types.
//!
//! Backend rows arrive snake_case with nearly every field optional, numbers
//! sometimes quoted and ids under several names. Everything is normalized
//! here so nothing past this module branches on raw field presence.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tally_core::{BillingAddress, Frequency, Role, Tenant, TenantId};
use tracing::debug;

/// Read-only view over one JSON object with lenient getters.
struct Fields<'a>(&'a Map<String, Value>);

impl<'a> Fields<'a> {
    fn string(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|n| match self.0.get(*n) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }

    fn count(&self, names: &[&str]) -> u32 {
        names
            .iter()
            .find_map(|n| match self.0.get(*n) {
                Some(Value::Number(n)) => n.as_u64().map(|v| v.min(u32::MAX as u64) as u32),
                Some(Value::String(s)) => s.trim().parse::<u32>().ok(),
                Some(Value::Array(items)) => Some(items.len() as u32),
                _ => None,
            })
            .unwrap_or(0)
    }

    fn object(&self, name: &str) -> Option<Fields<'a>> {
        match self.0.get(name) {
            Some(Value::Object(m)) => Some(Fields(m)),
            _ => None,
        }
    }

    fn raw(&self, names: &[&str]) -> Option<&'a Value> {
        names.iter().find_map(|n| self.0.get(*n)).filter(|v| !v.is_null())
    }
}

/// Unwraps `{ "data": [...] }`, `{ "companies": [...] }` and friends.
pub fn list_items(body: &Value) -> Vec<&Value> {
    match body {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => ["data", "companies", "items", "results"]
            .iter()
            .find_map(|k| map.get(*k))
            .map(|v| match v {
                Value::Array(items) => items.iter().collect(),
                _ => Vec::new(),
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Same as [`list_items`] but as an owned JSON array, the shape cached per tenant.
pub fn normalize_list(body: Value) -> Value {
    Value::Array(list_items(&body).into_iter().cloned().collect())
}

fn parse_frequencies(raw: Option<&Value>) -> BTreeSet<Frequency> {
    let mut out = BTreeSet::new();
    let mut push = |s: &str| {
        for part in s.split(',') {
            match Frequency::parse(part) {
                Some(f) => {
                    out.insert(f);
                }
                None if part.trim().is_empty() => {}
                None => debug!(value = part, "ignoring unknown report frequency"),
            }
        }
    };
    match raw {
        Some(Value::String(s)) => push(s),
        Some(Value::Array(items)) => {
            for item in items {
                match item {
                    Value::String(s) => push(s),
                    Value::Object(m) => {
                        if let Some(s) = Fields(m).string(&["frequency", "report_frequency", "name"]) {
                            push(&s);
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
    out
}

fn parse_address(f: &Fields<'_>) -> Option<BillingAddress> {
    let nested = f.object("billing_address").or_else(|| f.object("address"));
    let src = nested.as_ref().unwrap_or(f);
    let address = BillingAddress {
        line1: src.string(&["line1", "address_line1", "street", "address"]),
        line2: src.string(&["line2", "address_line2"]),
        city: src.string(&["city"]),
        state: src.string(&["state", "region"]),
        postal_code: src.string(&["postal_code", "zip", "zip_code"]),
        country: src.string(&["country"]),
    };
    (!address.is_empty()).then_some(address)
}

/// Maps one company row. `default_role` applies when the row carries no role
/// (the owner listing omits it).
pub fn tenant_from_value(value: &Value, default_role: Role) -> Option<Tenant> {
    let Value::Object(map) = value else {
        return None;
    };
    let f = Fields(map);
    // login_check nests the company under `company`.
    let company = f.object("company");
    let c = company.as_ref().unwrap_or(&f);

    let tenant_id = c
        .string(&["company_id", "companyId", "companyID", "id"])
        .or_else(|| f.string(&["company_id", "companyId", "companyID"]))?;

    let display_name = c
        .string(&["company_name", "companyName", "name"])
        .or_else(|| f.string(&["company_name", "companyName"]))
        .unwrap_or_else(|| tenant_id.clone());

    let role = f
        .string(&["admin_type", "adminType", "role"])
        .and_then(|r| Role::parse(&r))
        .unwrap_or(default_role);

    Some(Tenant {
        tenant_id: TenantId(tenant_id),
        display_name,
        role,
        report_frequencies: parse_frequencies(
            c.raw(&["report_frequency", "report_frequencies", "reportFrequency"]),
        ),
        employee_count: c.count(&["employee_count", "employees_count", "employees"]),
        device_count: c.count(&["device_count", "devices_count", "devices"]),
        billing_address: parse_address(c),
        logo_url: c.string(&["logo_url", "company_logo", "logo"]),
    })
}

/// Maps a company listing, skipping rows without an id.
pub fn tenants_from_body(body: &Value, default_role: Role) -> Vec<Tenant> {
    list_items(body)
        .into_iter()
        .filter_map(|v| {
            let t = tenant_from_value(v, default_role);
            if t.is_none() {
                debug!("skipping company row without an id");
            }
            t
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn company_rows_are_normalized() {
        let body = json!([
            {
                "company_id": 12,
                "company_name": "Acme",
                "report_frequency": "weekly, bi-weekly",
                "employee_count": "7",
                "devices": [{}, {}],
                "address": { "city": "Austin", "zip": "78701" }
            },
            { "name": "no id" }
        ]);
        let tenants = tenants_from_body(&body, Role::Owner);
        assert_eq!(tenants.len(), 1);
        let t = &tenants[0];
        assert_eq!(t.tenant_id, TenantId::from("12"));
        assert_eq!(t.display_name, "Acme");
        assert_eq!(t.role, Role::Owner);
        assert!(t.report_frequencies.contains(&Frequency::Weekly));
        assert!(t.report_frequencies.contains(&Frequency::BiWeekly));
        assert_eq!(t.employee_count, 7);
        assert_eq!(t.device_count, 2);
        assert_eq!(t.billing_address.as_ref().and_then(|a| a.city.as_deref()), Some("Austin"));
    }

    #[test]
    fn login_check_shape_takes_role_from_admin_type() {
        let body = json!({
            "admin_type": "super_admin",
            "company": { "id": "c-9", "name": "Globex" }
        });
        let t = tenant_from_value(&body, Role::Admin).unwrap();
        assert_eq!(t.tenant_id, TenantId::from("c-9"));
        assert_eq!(t.role, Role::SuperAdmin);
    }

    #[test]
    fn wrapped_lists_are_unwrapped() {
        let body = json!({ "data": [1, 2, 3] });
        assert_eq!(normalize_list(body), json!([1, 2, 3]));
        assert_eq!(normalize_list(json!({ "detail": "x" })), json!([]));
    }
}
