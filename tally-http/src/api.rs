//! Typed helpers over the consumed REST surface.

use std::sync::Arc;

use serde_json::{json, Value};
use tally_core::{ClientError, ClientResult, DataKind, Role, Tenant, TenantId};

use crate::coordinator::RequestCoordinator;
use crate::wire;

fn segment(raw: &str) -> String {
    urlencoding::encode(raw.trim()).into_owned()
}

#[derive(Clone)]
pub struct BackendApi {
    coordinator: Arc<RequestCoordinator>,
}

impl BackendApi {
    pub fn new(coordinator: Arc<RequestCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<RequestCoordinator> {
        &self.coordinator
    }

    /// `GET /employee/login_check/{email}`: the single tenant a non-owner
    /// administers, with their admin type as role.
    pub async fn login_check(&self, email: &str) -> ClientResult<Tenant> {
        let response = self
            .coordinator
            .get(format!("/employee/login_check/{}", segment(email)))
            .await?;
        wire::tenant_from_value(&response.body, Role::Admin)
            .ok_or_else(|| ClientError::unexpected_response(response.status))
    }

    /// `GET /company/user/{email}`: every company the owner can reach.
    pub async fn companies_for_user(&self, email: &str) -> ClientResult<Vec<Tenant>> {
        let response = self
            .coordinator
            .get(format!("/company/user/{}", segment(email)))
            .await?;
        Ok(wire::tenants_from_body(&response.body, Role::Owner))
    }

    pub async fn devices(&self, tenant: &TenantId) -> ClientResult<Value> {
        self.list(format!("/device/get_all/{}", segment(tenant.as_str()))).await
    }

    pub async fn employees(&self, tenant: &TenantId) -> ClientResult<Value> {
        self.list(format!("/employee/by-company/{}", segment(tenant.as_str())))
            .await
    }

    pub async fn report_emails(&self, tenant: &TenantId) -> ClientResult<Value> {
        self.list(format!(
            "/company-report-type/get_all_report_email/{}",
            segment(tenant.as_str())
        ))
        .await
    }

    /// Dispatches the preload fetch for `kind`. `Custom` kinds have no
    /// endpoint and are rejected.
    pub async fn fetch_kind(&self, tenant: &TenantId, kind: &DataKind) -> ClientResult<Value> {
        match kind {
            DataKind::Devices => self.devices(tenant).await,
            DataKind::Employees => self.employees(tenant).await,
            DataKind::ReportSettings => self.report_emails(tenant).await,
            DataKind::Custom(name) => Err(ClientError::validation(format!(
                "no endpoint for data kind `{name}`"
            ))),
        }
    }

    /// `POST /company/switch`.
    pub async fn switch_company(&self, tenant: &TenantId) -> ClientResult<()> {
        self.coordinator
            .post("/company/switch", json!({ "company_id": tenant.as_str() }))
            .await
            .map(|_| ())
    }

    async fn list(&self, path: String) -> ClientResult<Value> {
        let response = self.coordinator.get(path).await?;
        Ok(wire::normalize_list(response.body))
    }
}

#[cfg(test)]
mod tests {
    use super::segment;

    #[test]
    fn segments_are_percent_encoded() {
        assert_eq!(segment(" a.b+c@x.com "), "a.b%2Bc%40x.com");
        assert_eq!(segment("id 1/2"), "id%201%2F2");
    }
}
