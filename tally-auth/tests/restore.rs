use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tally_auth::{Credentials, GoTrueOptions, GoTrueProvider, SessionManager, SessionOptions, SessionState};
use tally_core::storage::keys;
use tally_core::{
    listener, FileTier, MemoryTier, PersistedToken, SessionEvent, TenantCache, TokenStore,
};
use tally_http::{Scripted, ScriptedTransport};

fn session_body(access_token: &str) -> serde_json::Value {
    json!({
        "access_token": access_token,
        "refresh_token": "rt-1",
        "expires_in": 3600,
        "user": { "id": "u1", "email": "a@b.com" }
    })
}

fn provider(transport: &Arc<ScriptedTransport>) -> Arc<GoTrueProvider> {
    Arc::new(GoTrueProvider::new(
        transport.clone(),
        GoTrueOptions::new("https://proj.supabase.co"),
    ))
}

/// A fresh tab: new session tier, same durable file.
fn new_tab(dir: &Path) -> TokenStore {
    TokenStore::new(Arc::new(MemoryTier::new()), Arc::new(FileTier::in_dir(dir)))
}

async fn boot(transport: &Arc<ScriptedTransport>, store: TokenStore) -> Arc<SessionManager> {
    SessionManager::init(
        provider(transport),
        store,
        Arc::new(TenantCache::new()),
        SessionOptions::default(),
    )
    .await
}

#[tokio::test]
async fn without_remember_me_a_new_tab_starts_signed_out() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    transport.on_post("token?grant_type=password", Scripted::ok(session_body("at-1")));

    let first = boot(&transport, new_tab(dir.path())).await;
    assert_eq!(first.state(), SessionState::Unauthenticated);
    let outcome = first.sign_in(&Credentials::new("a@b.com", "pw"), false).await;
    assert!(outcome.is_success());

    let reloaded = boot(&transport, new_tab(dir.path())).await;
    assert_eq!(reloaded.state(), SessionState::Unauthenticated);
}

#[tokio::test]
async fn with_remember_me_a_new_tab_restores_the_same_identity() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    transport.on_post("token?grant_type=password", Scripted::ok(session_body("at-1")));

    let first = boot(&transport, new_tab(dir.path())).await;
    let identity = first
        .sign_in(&Credentials::new("a@b.com", "pw"), true)
        .await
        .identity()
        .cloned()
        .unwrap();
    assert!(identity.expires_at > Utc::now() + Duration::minutes(59));

    let store = new_tab(dir.path());
    let reloaded = boot(&transport, store.clone()).await;
    assert_eq!(reloaded.state(), SessionState::Authenticated(identity.clone()));

    // The restored token is written back to the session tier.
    let blob = PersistedToken::read_session_blob(&store, keys::SESSION_BLOB).unwrap();
    assert_eq!(blob.access_token, identity.access_token);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn same_tab_reload_uses_the_session_blob() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.on_post("token?grant_type=password", Scripted::ok(session_body("at-1")));
    let store = TokenStore::in_memory();

    let first = boot(&transport, store.clone()).await;
    first.sign_in(&Credentials::new("a@b.com", "pw"), false).await;

    let reloaded = boot(&transport, store).await;
    assert_eq!(reloaded.identity().map(|i| i.access_token), Some("at-1".to_string()));
}

#[tokio::test]
async fn expired_remembered_token_is_refreshed() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.on_post("token?grant_type=refresh_token", Scripted::ok(session_body("at-2")));
    let store = TokenStore::in_memory();
    store.set(keys::REMEMBER_ME, "true");
    PersistedToken {
        user_id: "u1".into(),
        email: "a@b.com".into(),
        access_token: "at-1".into(),
        refresh_token: Some("rt-1".into()),
        expires_at: Utc::now() - Duration::minutes(5),
    }
    .write_durable(&store);

    let manager = Arc::new(SessionManager::new(
        provider(&transport),
        store.clone(),
        Arc::new(TenantCache::new()),
        SessionOptions::default(),
    ));
    let restored = Arc::new(AtomicUsize::new(0));
    manager.events().on(listener({
        let restored = restored.clone();
        move |event: SessionEvent| {
            let restored = restored.clone();
            async move {
                if matches!(event, SessionEvent::Restored(_)) {
                    restored.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
        }
    }));

    manager.restore().await;

    assert_eq!(manager.identity().map(|i| i.access_token), Some("at-2".to_string()));
    assert_eq!(store.get(keys::ACCESS_TOKEN).as_deref(), Some("at-2"));
    assert_eq!(restored.load(Ordering::SeqCst), 1);
    let sent = &transport.requests()[0];
    assert_eq!(sent.body, Some(json!({ "refresh_token": "rt-1" })));
}

#[tokio::test]
async fn failed_refresh_forgets_the_stored_token() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.on_post(
        "token?grant_type=refresh_token",
        Scripted::Json(400, json!({ "error_description": "Invalid Refresh Token" })),
    );
    let store = TokenStore::in_memory();
    store.set(keys::REMEMBER_ME, "true");
    store.set(keys::LAST_SELECTED_COMPANY, "c1");
    PersistedToken {
        user_id: "u1".into(),
        email: "a@b.com".into(),
        access_token: "at-1".into(),
        refresh_token: Some("rt-1".into()),
        expires_at: Utc::now() - Duration::minutes(5),
    }
    .write_durable(&store);

    let manager = boot(&transport, store.clone()).await;

    assert_eq!(manager.state(), SessionState::Unauthenticated);
    assert_eq!(store.get(keys::ACCESS_TOKEN), None);
    assert_eq!(store.get(keys::LAST_SELECTED_COMPANY).as_deref(), Some("c1"));
}
