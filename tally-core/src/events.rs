use std::future::Future;
use std::pin::Pin;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use anyhow::Result;
use parking_lot::RwLock;
use tracing::warn;

use crate::identity::Identity;
use crate::tenant::{Tenant, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static LISTENER_ID: AtomicU64 = AtomicU64::new(1);

fn next_listener_id() -> ListenerId {
    ListenerId(LISTENER_ID.fetch_add(1, Ordering::Relaxed))
}

pub type ListenerFut<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Listener signature (async).
pub type EventListener<E> = Arc<dyn for<'a> Fn(&'a E) -> ListenerFut<'a> + Send + Sync>;

/// Broadcast after every successful tenant switch.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantChanged {
    pub tenant: Tenant,
    pub tenant_id: TenantId,
}

/// Session lifecycle transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SignedIn(Identity),
    Restored(Identity),
    Refreshed(Identity),
    SignedOut,
    /// The backing account disappeared server-side.
    AccountRemoved { email: String },
}

impl SessionEvent {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionEvent::SignedIn(i) | SessionEvent::Restored(i) | SessionEvent::Refreshed(i) => {
                Some(i)
            }
            SessionEvent::SignedOut | SessionEvent::AccountRemoved { .. } => None,
        }
    }
}

struct ListenerEntry<E> {
    id: ListenerId,
    listener: EventListener<E>,
    once: bool,
}

/// Typed, runtime-agnostic event hub.
///
/// Emission never holds the lock across `.await`:
/// 1) snapshot listeners (read lock, no await)
/// 2) drop the snapshotted `once` listeners (write lock, no await)
/// 3) await listeners (no lock held)
pub struct EventHub<E> {
    listeners: RwLock<Vec<ListenerEntry<E>>>,
}

impl<E> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventHub<E> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn on(&self, listener: EventListener<E>) -> ListenerId {
        self.push(listener, false)
    }

    pub fn once(&self, listener: EventListener<E>) -> ListenerId {
        self.push(listener, true)
    }

    fn push(&self, listener: EventListener<E>, once: bool) -> ListenerId {
        let id = next_listener_id();
        self.listeners.write().push(ListenerEntry { id, listener, once });
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|e| e.id != id);
        before != listeners.len()
    }

    pub fn remove_all(&self) -> usize {
        let mut listeners = self.listeners.write();
        let n = listeners.len();
        listeners.clear();
        n
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn snapshot(&self) -> (Vec<EventListener<E>>, Vec<ListenerId>) {
        let listeners = self.listeners.read();
        let to_call = listeners.iter().map(|e| Arc::clone(&e.listener)).collect();
        let once_ids = listeners.iter().filter(|e| e.once).map(|e| e.id).collect();
        (to_call, once_ids)
    }

    fn finalize_once_removals(&self, once_ids: &[ListenerId]) {
        if once_ids.is_empty() {
            return;
        }
        self.listeners.write().retain(|e| !once_ids.contains(&e.id));
    }

    /// Delivers `event` to every listener registered at the time of the call.
    /// A failing listener is logged and does not stop the others.
    pub async fn emit(&self, event: &E) -> usize {
        let (listeners, once_ids) = self.snapshot();
        // A re-entrant emit from inside a listener must not fire them again.
        self.finalize_once_removals(&once_ids);

        for f in &listeners {
            if let Err(e) = f(event).await {
                warn!(error = %e, "event listener failed");
            }
        }
        listeners.len()
    }
}

fn bind<E, F>(f: F) -> F
where
    F: for<'a> Fn(&'a E) -> ListenerFut<'a> + Send + Sync,
{
    f
}

/// Wraps an async closure into an [`EventListener`]. The closure receives an
/// owned copy of the event.
pub fn listener<E, F, Fut>(f: F) -> EventListener<E>
where
    E: Clone + Send + Sync + 'static,
    F: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(bind(move |event: &E| -> ListenerFut<'_> { Box::pin(f(event.clone())) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(counter: Arc<AtomicUsize>) -> EventListener<u32> {
        listener(move |n: u32| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(n as usize, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn on_and_off() {
        let hub = EventHub::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = hub.on(counting(hits.clone()));

        assert_eq!(hub.emit(&2).await, 1);
        assert!(hub.off(id));
        assert_eq!(hub.emit(&2).await, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn once_fires_a_single_time() {
        let hub = EventHub::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        hub.once(counting(hits.clone()));

        hub.emit(&1).await;
        hub.emit(&1).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(hub.listener_count(), 0);
    }

    #[tokio::test]
    async fn failing_listener_does_not_block_others() {
        let hub = EventHub::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        hub.on(listener(|_n: u32| async { Err(anyhow::anyhow!("boom")) }));
        hub.on(counting(hits.clone()));

        assert_eq!(hub.emit(&5).await, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }
}
