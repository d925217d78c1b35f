//! In-process transport double.
//!
//! Routes match on method and URL suffix. Each route replays its queued
//! responses in order and keeps answering with the last one once the queue
//! is down to a single entry. Unrouted calls get a 404.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use parking_lot::Mutex;
use serde_json::Value;
use tally_core::{ClientError, ClientResult};
use tokio::sync::{Notify, Semaphore};

use crate::transport::{OutboundRequest, RawResponse, Transport};

#[derive(Clone, Debug)]
pub enum Scripted {
    Json(u16, Value),
    Raw(RawResponse),
    Unreachable(String),
}

impl Scripted {
    pub fn ok(body: Value) -> Self {
        Scripted::Json(200, body)
    }

    fn into_result(self) -> ClientResult<RawResponse> {
        match self {
            Scripted::Json(status, body) => Ok(RawResponse::new(status, body.to_string())),
            Scripted::Raw(raw) => Ok(raw),
            Scripted::Unreachable(message) => Err(ClientError::unreachable(message)),
        }
    }
}

/// Holds every gated call until opened. Opening is permanent.
#[derive(Clone, Debug)]
pub struct Gate {
    semaphore: Arc<Semaphore>,
}

impl Gate {
    pub fn closed() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn open(&self) {
        self.semaphore.close();
    }

    async fn pass(&self) {
        // Acquire only fails once the semaphore is closed, which is the signal.
        let _ = self.semaphore.acquire().await;
    }
}

struct Route {
    method: Method,
    suffix: String,
    responses: VecDeque<Scripted>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<OutboundRequest>>,
    arrived: Notify,
    gate: Mutex<Option<Gate>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `response` for calls whose method matches and whose URL ends with `suffix`.
    pub fn route(&self, method: Method, suffix: impl Into<String>, response: Scripted) -> &Self {
        let suffix = suffix.into();
        let mut routes = self.routes.lock();
        match routes
            .iter_mut()
            .find(|r| r.method == method && r.suffix == suffix)
        {
            Some(route) => route.responses.push_back(response),
            None => routes.push(Route {
                method,
                suffix,
                responses: VecDeque::from([response]),
            }),
        }
        self
    }

    pub fn on_get(&self, suffix: impl Into<String>, response: Scripted) -> &Self {
        self.route(Method::GET, suffix, response)
    }

    pub fn on_post(&self, suffix: impl Into<String>, response: Scripted) -> &Self {
        self.route(Method::POST, suffix, response)
    }

    /// Holds every subsequent call until `gate` opens.
    pub fn hold(&self, gate: Gate) {
        *self.gate.lock() = Some(gate);
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.open();
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_to(&self, suffix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.url.ends_with(suffix))
            .count()
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.calls.lock().clone()
    }

    /// Resolves once at least `n` calls have reached the transport.
    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.arrived.notified();
            if self.call_count() >= n {
                return;
            }
            notified.await;
        }
    }

    fn next_response(&self, request: &OutboundRequest) -> Scripted {
        let mut routes = self.routes.lock();
        let route = routes
            .iter_mut()
            .filter(|r| r.method == request.method && request.url.ends_with(&r.suffix))
            .max_by_key(|r| r.suffix.len());
        match route {
            Some(route) if route.responses.len() > 1 => route
                .responses
                .pop_front()
                .unwrap_or_else(|| Scripted::Json(404, Value::Null)),
            Some(route) => route
                .responses
                .front()
                .cloned()
                .unwrap_or_else(|| Scripted::Json(404, Value::Null)),
            None => Scripted::Raw(RawResponse::new(404, r#"{"detail":"Not Found"}"#)),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: OutboundRequest) -> ClientResult<RawResponse> {
        let response = self.next_response(&request);
        self.calls.lock().push(request);
        self.arrived.notify_waiters();

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        response.into_result()
    }
}
