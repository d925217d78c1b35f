use std::sync::Arc;

use serde_json::json;
use tally_core::storage::keys;
use tally_core::{ClientError, PersistedToken, TokenStore};
use tally_http::{
    Gate, RequestCoordinator, RequestDescriptor, RequestOptions, Scripted, ScriptedTransport,
};

fn coordinator(transport: Arc<ScriptedTransport>, store: TokenStore) -> Arc<RequestCoordinator> {
    let options = RequestOptions::builder().base_url("https://api.test").build();
    Arc::new(RequestCoordinator::new(transport, store, options))
}

#[tokio::test]
async fn concurrent_identical_calls_share_one_network_call() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.on_get("/device/get_all/7", Scripted::ok(json!([{ "id": 1 }])));
    let gate = Gate::closed();
    transport.hold(gate.clone());

    let coord = coordinator(transport.clone(), TokenStore::in_memory());

    let a = tokio::spawn({
        let coord = coord.clone();
        async move { coord.get("/device/get_all/7").await }
    });
    let b = tokio::spawn({
        let coord = coord.clone();
        async move { coord.get("/device/get_all/7").await }
    });

    transport.wait_for_calls(1).await;
    tokio::task::yield_now().await;
    assert_eq!(coord.in_flight(), 1);

    gate.open();
    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    assert_eq!(transport.call_count(), 1);
    assert_eq!(a, b);
    assert_eq!(a.body, json!([{ "id": 1 }]));
    assert_eq!(coord.in_flight(), 0);
}

#[tokio::test]
async fn concurrent_callers_observe_the_same_failure_and_the_key_is_released() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.on_get("/company/user/a@b.com", Scripted::Json(500, json!({ "detail": "boom" })));
    transport.on_get("/company/user/a@b.com", Scripted::ok(json!([])));
    let gate = Gate::closed();
    transport.hold(gate.clone());

    let coord = coordinator(transport.clone(), TokenStore::in_memory());
    let first = coord.get("/company/user/a@b.com");
    let second = coord.get("/company/user/a@b.com");
    let opener = async {
        transport.wait_for_calls(1).await;
        gate.open();
    };
    let (first, second, ()) = tokio::join!(first, second, opener);

    let expected = ClientError::http(500, "boom");
    assert_eq!(first.unwrap_err(), expected);
    assert_eq!(second.unwrap_err(), expected);
    assert_eq!(transport.call_count(), 1);
    assert_eq!(coord.in_flight(), 0);

    // A later call is a fresh request, not the settled failure.
    let third = coord.get("/company/user/a@b.com").await.unwrap();
    assert_eq!(third.body, json!([]));
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn different_bodies_are_not_collapsed() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.on_post("/company/switch", Scripted::ok(json!({ "ok": true })));
    let coord = coordinator(transport.clone(), TokenStore::in_memory());

    let (a, b) = tokio::join!(
        coord.execute(RequestDescriptor::post("/company/switch", json!({ "company_id": "1" }))),
        coord.execute(RequestDescriptor::post("/company/switch", json!({ "company_id": "2" }))),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn unreachable_is_distinct_from_rejected() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.on_get("/employee/by-company/1", Scripted::Unreachable("connection refused".into()));
    let coord = coordinator(transport, TokenStore::in_memory());

    let err = coord.get("/employee/by-company/1").await.unwrap_err();
    assert!(err.is_unreachable());
    assert_eq!(err.status(), None);
}

#[tokio::test]
async fn bearer_comes_from_the_session_blob_then_durable_storage() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.on_get("/device/get_all/1", Scripted::ok(json!([])));
    let store = TokenStore::in_memory();
    let coord = coordinator(transport.clone(), store.clone());

    coord.get("/device/get_all/1").await.unwrap();
    assert_eq!(transport.requests()[0].bearer, None);

    store.set(keys::ACCESS_TOKEN, "durable-token");
    coord.get("/device/get_all/1").await.unwrap();
    assert_eq!(transport.requests()[1].bearer.as_deref(), Some("durable-token"));

    let token = PersistedToken {
        user_id: "u1".into(),
        email: "a@b.com".into(),
        access_token: "blob-token".into(),
        refresh_token: None,
        expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
    };
    token.write_session_blob(&store, keys::SESSION_BLOB);
    coord.get("/device/get_all/1").await.unwrap();
    assert_eq!(transport.requests()[2].bearer.as_deref(), Some("blob-token"));
    assert_eq!(transport.requests()[2].url, "https://api.test/device/get_all/1");
}
