#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tally_auth::{Credentials, IdentityProvider, SessionManager, SessionOptions};
use tally_core::{ClientError, ClientResult, Identity, TenantCache, TokenStore};
use tally_http::{BackendApi, RequestCoordinator, RequestOptions, Scripted, ScriptedTransport};
use tally_tenant::{TenantContext, TenantOptions};

pub const EMAIL: &str = "a@b.com";
pub const EMAIL_SEGMENT: &str = "a%40b.com";

pub struct AcceptAll;

#[async_trait]
impl IdentityProvider for AcceptAll {
    async fn sign_in_with_password(&self, credentials: &Credentials) -> ClientResult<Identity> {
        Ok(Identity::new(
            "u1",
            credentials.email.clone(),
            "at-1",
            Utc::now() + Duration::hours(1),
        ))
    }

    async fn refresh(&self, _refresh_token: &str) -> ClientResult<Identity> {
        Err(ClientError::http(401, "Invalid Refresh Token"))
    }

    async fn sign_out(&self, _access_token: &str) -> ClientResult<()> {
        Ok(())
    }
}

pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub session: Arc<SessionManager>,
    pub ctx: TenantContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(TenantOptions::default())
    }

    pub fn with_options(options: TenantOptions) -> Self {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on_post("/company/switch", Scripted::ok(json!({ "ok": true })));

        let store = TokenStore::in_memory();
        let session = Arc::new(SessionManager::new(
            Arc::new(AcceptAll),
            store.clone(),
            Arc::new(TenantCache::new()),
            SessionOptions::default(),
        ));
        let coordinator = Arc::new(RequestCoordinator::new(
            transport.clone(),
            store,
            RequestOptions::builder().base_url("https://api.test").build(),
        ));
        let ctx = TenantContext::new(session.clone(), BackendApi::new(coordinator), options);

        Self {
            transport,
            session,
            ctx,
        }
    }

    pub async fn signed_in() -> Self {
        let h = Self::new();
        h.sign_in().await;
        h
    }

    pub async fn sign_in(&self) {
        self.sign_in_as(EMAIL).await;
    }

    pub async fn sign_in_as(&self, email: &str) {
        let outcome = self.session.sign_in(&Credentials::new(email, "pw"), true).await;
        assert!(outcome.is_success());
    }

    pub fn companies(&self, rows: Value) {
        self.transport
            .on_get(format!("/company/user/{EMAIL_SEGMENT}"), Scripted::ok(rows));
    }

    pub fn tenant_lists(&self, tenant: &str) {
        self.transport.on_get(
            format!("/device/get_all/{tenant}"),
            Scripted::ok(json!([{ "id": format!("{tenant}-d1") }])),
        );
        self.transport.on_get(
            format!("/employee/by-company/{tenant}"),
            Scripted::ok(json!([{ "email": format!("e@{tenant}.com") }])),
        );
        self.transport.on_get(
            format!("/company-report-type/get_all_report_email/{tenant}"),
            Scripted::ok(json!({ "data": [] })),
        );
    }
}

pub fn three_companies() -> Value {
    json!([
        { "company_id": "t1", "company_name": "First" },
        { "company_id": "t2", "company_name": "Second" },
        { "company_id": "t3", "company_name": "Third" }
    ])
}
