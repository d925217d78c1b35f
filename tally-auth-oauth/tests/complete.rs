use std::sync::Arc;

use serde_json::json;
use tally_auth::{GoTrueOptions, GoTrueProvider, SessionManager, SessionOptions, SessionState};
use tally_auth_oauth::{OAuthService, StaticRedirect};
use tally_core::{TenantCache, TokenStore};
use tally_http::{Scripted, ScriptedTransport};

fn service(transport: &Arc<ScriptedTransport>) -> OAuthService {
    let provider = Arc::new(GoTrueProvider::new(
        transport.clone(),
        GoTrueOptions::new("https://proj.supabase.co"),
    ));
    let session = Arc::new(SessionManager::new(
        provider,
        TokenStore::in_memory(),
        Arc::new(TenantCache::new()),
        SessionOptions::default(),
    ));
    OAuthService::new(session).with_redirect(Arc::new(StaticRedirect {
        success: "/dashboard".into(),
        failure: "/login".into(),
    }))
}

#[tokio::test]
async fn implicit_callback_signs_in_and_redirects() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.on_get("auth/v1/user", Scripted::ok(json!({ "id": "u1", "email": "a@b.com" })));
    let svc = service(&transport);

    let done = svc
        .complete("https://admin.test/auth/callback#access_token=at&expires_in=3600", true)
        .await
        .unwrap();

    assert_eq!(done.identity.email, "a@b.com");
    assert_eq!(done.location.as_deref(), Some("/dashboard"));
    assert!(matches!(svc.session.state(), SessionState::Authenticated(_)));
}

#[tokio::test]
async fn code_callback_uses_the_stored_verifier() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.on_post(
        "token?grant_type=pkce",
        Scripted::ok(json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 3600,
            "user": { "id": "u1", "email": "a@b.com" }
        })),
    );
    let svc = service(&transport);
    let key = svc.code_verifier_key();
    svc.session.store().set(&key, "verifier-1");

    svc.complete("https://admin.test/auth/callback?code=c-1", false)
        .await
        .unwrap();

    assert_eq!(
        transport.requests()[0].body,
        Some(json!({ "auth_code": "c-1", "code_verifier": "verifier-1" }))
    );
    assert_eq!(svc.session.store().get(&key), None);
}

#[tokio::test]
async fn denied_callback_reports_the_failure_location() {
    let transport = Arc::new(ScriptedTransport::new());
    let svc = service(&transport);

    let err = svc
        .complete("https://admin.test/auth/callback?error=access_denied", true)
        .await
        .err()
        .unwrap();

    assert_eq!(err.message, "access denied");
    assert_eq!(err.location.as_deref(), Some("/login?error=access+denied"));
    assert_eq!(transport.call_count(), 0);
    assert_eq!(svc.session.state(), SessionState::Unauthenticated);
}
