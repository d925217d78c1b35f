//! In-flight request deduplication.
//!
//! Identical requests (same method, URL and body) issued while one is still
//! in flight share its outcome instead of hitting the network again. The
//! first caller's call is authoritative: every concurrent caller sees the same
//! success or the same error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use http::{Method, StatusCode};
use parking_lot::Mutex;
use serde_json::Value;
use tally_core::{ClientError, ClientResult, PersistedToken, TokenStore};
use tracing::{debug, instrument, warn};

use crate::options::RequestOptions;
use crate::transport::{OutboundRequest, RawResponse, Transport};

/// What the caller wants to call.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// `METHOD|url|body`. Object keys serialize in sorted order, so two
    /// bodies that differ only in key order share a key.
    pub fn dedup_key(&self) -> String {
        let body = self
            .body
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_default();
        format!("{}|{}|{}", self.method, self.url, body)
    }
}

/// A successful (2xx) response with its body parsed.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> ClientResult<T> {
        serde_json::from_value(self.body.clone())
            .map_err(|_| ClientError::unexpected_response(self.status))
    }
}

type SharedResponse = Shared<BoxFuture<'static, ClientResult<Response>>>;

struct PendingRequest {
    id: u64,
    future: SharedResponse,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingRequest>>>;

/// Removes its key from the pending map when dropped, whether the call
/// succeeded, failed or the task panicked.
struct PendingGuard {
    pending: PendingMap,
    key: String,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        if pending.get(&self.key).map(|p| p.id) == Some(self.id) {
            pending.remove(&self.key);
        }
    }
}

pub struct RequestCoordinator {
    transport: Arc<dyn Transport>,
    store: TokenStore,
    options: RequestOptions,
    pending: PendingMap,
    next_id: AtomicU64,
}

impl RequestCoordinator {
    pub fn new(transport: Arc<dyn Transport>, store: TokenStore, options: RequestOptions) -> Self {
        Self {
            transport,
            store,
            options,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Number of calls currently on the wire.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    /// Issues `descriptor`, or joins the identical call already in flight.
    ///
    /// The call itself runs on its own task: a caller giving up does not
    /// cancel it, and its pending entry is always cleaned up when it settles.
    #[instrument(skip(self, descriptor), fields(method = %descriptor.method, url = %descriptor.url))]
    pub async fn execute(&self, descriptor: RequestDescriptor) -> ClientResult<Response> {
        let descriptor = RequestDescriptor {
            url: self.options.resolve(&descriptor.url),
            ..descriptor
        };
        let key = descriptor.dedup_key();

        let future = {
            let mut pending = self.pending.lock();
            match pending.get(&key) {
                Some(existing) => {
                    debug!(%key, "joining in-flight request");
                    existing.future.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = self.spawn_call(key.clone(), id, descriptor);
                    pending.insert(
                        key,
                        PendingRequest {
                            id,
                            future: future.clone(),
                        },
                    );
                    future
                }
            }
        };

        future.await
    }

    pub async fn get(&self, url: impl Into<String>) -> ClientResult<Response> {
        self.execute(RequestDescriptor::get(url)).await
    }

    pub async fn post(&self, url: impl Into<String>, body: Value) -> ClientResult<Response> {
        self.execute(RequestDescriptor::post(url, body)).await
    }

    fn spawn_call(&self, key: String, id: u64, descriptor: RequestDescriptor) -> SharedResponse {
        let request = OutboundRequest {
            method: descriptor.method,
            url: descriptor.url,
            body: descriptor.body,
            bearer: PersistedToken::bearer(&self.store, &self.options.session_blob_key),
            headers: Vec::new(),
        };
        let transport = Arc::clone(&self.transport);
        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            key,
            id,
        };

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let raw = transport.send(request).await?;
            interpret(raw)
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "request task did not complete");
                    Err(ClientError::http(500, "Request was interrupted"))
                }
            }
        }
        .boxed()
        .shared()
    }
}

/// 2xx → parsed body (`Null` when empty); anything else → `Http` with the
/// best message the body offers.
pub fn interpret(raw: RawResponse) -> ClientResult<Response> {
    if raw.is_success() {
        let body = if raw.body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&raw.body)
                .map_err(|_| ClientError::unexpected_response(raw.status))?
        };
        return Ok(Response {
            status: raw.status,
            body,
        });
    }

    Err(ClientError::http(raw.status, error_message(&raw)))
}

/// Looks for `detail`, `error`, `message`, `msg` or `error_description` in
/// a JSON error body, falling back to the status reason.
pub fn error_message(raw: &RawResponse) -> String {
    let from_body = serde_json::from_str::<Value>(&raw.body)
        .ok()
        .and_then(|v| message_from_value(&v));

    from_body
        .or_else(|| {
            let text = raw.body.trim();
            (!text.is_empty() && text.len() <= 200 && !text.starts_with('<'))
                .then(|| text.to_string())
        })
        .or_else(|| {
            StatusCode::from_u16(raw.status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "Request failed".to_string())
}

fn message_from_value(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(message_from_value).collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        Value::Object(map) => ["detail", "error", "message", "msg", "error_description"]
            .iter()
            .find_map(|k| map.get(*k).and_then(message_from_value)),
        _ => None,
    }
}
