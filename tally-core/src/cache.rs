//! Process-lifetime cache of per-tenant data.
//!
//! Entries are keyed by `(tenant, kind)` and never expire on their own: the
//! cached lists only change through explicit mutations, and whoever mutates
//! is expected to invalidate.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::errors::ClientResult;
use crate::tenant::{DataKind, TenantId};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub tenant_id: TenantId,
    pub kind: DataKind,
    pub payload: Value,
    pub inserted_at: DateTime<Utc>,
}

type CacheKey = (TenantId, DataKind);

#[derive(Debug, Default)]
pub struct TenantCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl TenantCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tenant_id: &TenantId, kind: &DataKind) -> Option<Value> {
        self.entry(tenant_id, kind).map(|e| e.payload)
    }

    pub fn entry(&self, tenant_id: &TenantId, kind: &DataKind) -> Option<CacheEntry> {
        self.entries
            .read()
            .get(&(tenant_id.clone(), kind.clone()))
            .cloned()
    }

    pub fn contains(&self, tenant_id: &TenantId, kind: &DataKind) -> bool {
        self.entries
            .read()
            .contains_key(&(tenant_id.clone(), kind.clone()))
    }

    pub fn put(&self, tenant_id: &TenantId, kind: DataKind, payload: Value) {
        let entry = CacheEntry {
            tenant_id: tenant_id.clone(),
            kind: kind.clone(),
            payload,
            inserted_at: Utc::now(),
        };
        self.entries.write().insert((tenant_id.clone(), kind), entry);
    }

    /// Drops a single `(tenant, kind)` slot, e.g. after an employee was edited.
    pub fn invalidate(&self, tenant_id: &TenantId, kind: &DataKind) -> bool {
        self.entries
            .write()
            .remove(&(tenant_id.clone(), kind.clone()))
            .is_some()
    }

    pub fn invalidate_tenant(&self, tenant_id: &TenantId) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(t, _), _| t != tenant_id);
        let removed = before - entries.len();
        debug!(tenant_id = %tenant_id, removed, "invalidated tenant cache");
        removed
    }

    pub fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        debug!(removed, "invalidated all tenant caches");
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Cached value if present, otherwise `fetcher(tenant_id)`.
    ///
    /// Only a successful fetch is stored; a failed one leaves the slot empty
    /// and the error goes back to the caller.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        tenant_id: &TenantId,
        kind: DataKind,
        fetcher: F,
    ) -> ClientResult<Value>
    where
        F: FnOnce(TenantId) -> Fut,
        Fut: Future<Output = ClientResult<Value>>,
    {
        if let Some(hit) = self.get(tenant_id, &kind) {
            debug!(tenant_id = %tenant_id, kind = %kind, "tenant cache hit");
            return Ok(hit);
        }

        // No lock is held across the fetch.
        let payload = fetcher(tenant_id.clone()).await?;
        self.put(tenant_id, kind, payload.clone());
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ClientError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn lookups_are_scoped_by_tenant() {
        let cache = TenantCache::new();
        let a = TenantId::from("a");
        let b = TenantId::from("b");
        cache.put(&a, DataKind::Devices, json!(["d1"]));

        assert_eq!(cache.get(&a, &DataKind::Devices), Some(json!(["d1"])));
        assert_eq!(cache.get(&b, &DataKind::Devices), None);
        assert_eq!(cache.get(&a, &DataKind::Employees), None);
    }

    #[test]
    fn invalidate_tenant_only_touches_that_tenant() {
        let cache = TenantCache::new();
        let a = TenantId::from("a");
        let b = TenantId::from("b");
        cache.put(&a, DataKind::Devices, json!([]));
        cache.put(&a, DataKind::Employees, json!([]));
        cache.put(&b, DataKind::Devices, json!([]));

        assert_eq!(cache.invalidate_tenant(&a), 2);
        assert_eq!(cache.get(&a, &DataKind::Devices), None);
        assert!(cache.contains(&b, &DataKind::Devices));

        assert_eq!(cache.invalidate_all(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn get_or_fetch_populates_once() {
        let cache = TenantCache::new();
        let calls = AtomicUsize::new(0);
        let t = TenantId::from("t1");

        for _ in 0..3 {
            let v = cache
                .get_or_fetch(&t, DataKind::Devices, |id| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(json!({ "tenant": id.0 })) }
                })
                .await
                .unwrap();
            assert_eq!(v, json!({ "tenant": "t1" }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_fetch_caches_nothing() {
        let cache = TenantCache::new();
        let t = TenantId::from("t1");
        let err = cache
            .get_or_fetch(&t, DataKind::Employees, |_| async {
                Err(ClientError::http(502, "bad gateway"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(502));
        assert!(!cache.contains(&t, &DataKind::Employees));
    }
}
