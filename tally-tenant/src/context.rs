//! # Tenant context
//!
//! Owns which tenant is active among the ones the signed-in identity can
//! reach. Loads the tenant set (collapsing concurrent loads per e-mail),
//! switches tenants with cache preloads and a [`TenantChanged`] broadcast, and
//! detects accounts that disappeared server-side.
//!
//! The context follows the session: a new sign-in or a sign-out drops the
//! tenant set, and an account removal blanks it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tally_auth::SessionManager;
use tally_core::storage::keys;
use tally_core::{
    listener, ClientError, ClientResult, DataKind, EventHub, ListenerId, Role, SessionEvent, Tenant,
    TenantChanged, TenantId, TenantSet, TenantSummary,
};
use tally_http::BackendApi;
use tracing::{debug, info, instrument, warn};

use crate::options::TenantOptions;
use crate::preload::PreloadHandle;

/// Result of a tenant-set load.
#[derive(Debug, Clone, PartialEq)]
pub enum TenantSetLoad {
    Loaded {
        tenants: TenantSet,
        active: Option<Tenant>,
    },
    /// The backend no longer knows this identity. The session is already expired.
    Deleted { email: String },
}

impl TenantSetLoad {
    pub fn is_deleted(&self) -> bool {
        matches!(self, TenantSetLoad::Deleted { .. })
    }

    pub fn active(&self) -> Option<&Tenant> {
        match self {
            TenantSetLoad::Loaded { active, .. } => active.as_ref(),
            TenantSetLoad::Deleted { .. } => None,
        }
    }
}

#[derive(Debug)]
pub enum SwitchOutcome {
    Switched(PreloadHandle),
    AlreadyActive,
    InProgress,
}

type SharedLoad = Shared<BoxFuture<'static, ClientResult<TenantSetLoad>>>;

struct PendingLoad {
    id: u64,
    future: SharedLoad,
}

#[derive(Default)]
struct State {
    tenants: TenantSet,
    active: Option<Tenant>,
    switching: bool,
    /// Set once the signed-in account was found deleted.
    deleted_email: Option<String>,
}

struct Inner {
    session: Arc<SessionManager>,
    api: BackendApi,
    options: TenantOptions,
    state: RwLock<State>,
    loads: Mutex<HashMap<String, PendingLoad>>,
    next_load: AtomicU64,
    events: EventHub<TenantChanged>,
    session_listener: Mutex<Option<ListenerId>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(id) = self.session_listener.lock().take() {
            self.session.events().off(id);
        }
    }
}

/// Drops the pending load entry once the load settles.
struct LoadGuard {
    inner: Arc<Inner>,
    key: String,
    id: u64,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        let mut loads = self.inner.loads.lock();
        if loads.get(&self.key).map(|p| p.id) == Some(self.id) {
            loads.remove(&self.key);
        }
    }
}

/// Clears the in-progress flag when the switch returns.
struct SwitchGuard<'a>(&'a Inner);

impl Drop for SwitchGuard<'_> {
    fn drop(&mut self) {
        self.0.state.write().switching = false;
    }
}

#[derive(Clone)]
pub struct TenantContext {
    inner: Arc<Inner>,
}

impl TenantContext {
    pub fn new(session: Arc<SessionManager>, api: BackendApi, options: TenantOptions) -> Self {
        let inner = Arc::new(Inner {
            session,
            api,
            options,
            state: RwLock::new(State::default()),
            loads: Mutex::new(HashMap::new()),
            next_load: AtomicU64::new(1),
            events: EventHub::new(),
            session_listener: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let id = inner.session.events().on(listener(move |event: SessionEvent| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.on_session_event(&event);
                }
                Ok(())
            }
        }));
        *inner.session_listener.lock() = Some(id);

        Self { inner }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.inner.session
    }

    pub fn events(&self) -> &EventHub<TenantChanged> {
        &self.inner.events
    }

    pub fn active_tenant(&self) -> Option<Tenant> {
        self.inner.state.read().active.clone()
    }

    pub fn tenant_set(&self) -> TenantSet {
        self.inner.state.read().tenants.clone()
    }

    pub fn is_switching(&self) -> bool {
        self.inner.state.read().switching
    }

    /// True once a deletion was detected for the current session.
    pub fn account_deleted(&self) -> bool {
        self.inner.state.read().deleted_email.is_some()
    }

    /// Fetches the tenants reachable by `email` and picks the active one.
    ///
    /// Concurrent loads for the same address share a single fetch.
    #[instrument(skip(self))]
    pub async fn load_tenant_set(&self, email: &str) -> ClientResult<TenantSetLoad> {
        let email = email.trim().to_string();
        if email.is_empty() {
            return Err(ClientError::validation(
                "An e-mail address is required to load tenants",
            ));
        }
        let key = email.to_lowercase();

        let future = {
            let mut loads = self.inner.loads.lock();
            match loads.get(&key) {
                Some(pending) => {
                    debug!("joining in-flight tenant load");
                    pending.future.clone()
                }
                None => {
                    let id = self.inner.next_load.fetch_add(1, Ordering::Relaxed);
                    let guard = LoadGuard {
                        inner: Arc::clone(&self.inner),
                        key: key.clone(),
                        id,
                    };
                    let inner = Arc::clone(&self.inner);
                    let handle = tokio::spawn(async move {
                        let _guard = guard;
                        inner.run_load(email).await
                    });
                    let future = async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(e) => {
                                warn!(error = %e, "tenant load task did not complete");
                                Err(ClientError::http(500, "Tenant load was interrupted"))
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    loads.insert(
                        key,
                        PendingLoad {
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

    /// Loads again for the signed-in identity, dropping every cached list.
    pub async fn reload_tenant_set(&self) -> ClientResult<TenantSetLoad> {
        let identity = self
            .inner
            .session
            .identity()
            .ok_or_else(|| ClientError::validation("Sign in before loading tenants"))?;
        let dropped = self.inner.session.cache().invalidate_all();
        debug!(dropped, "reloading tenant set");
        self.load_tenant_set(&identity.email).await
    }

    /// Makes `tenant_id` the active tenant.
    ///
    /// The new tenant is active and persisted before this returns. Preloads
    /// run in the background and are reported through the returned handle;
    /// a failed preload never undoes the switch.
    #[instrument(skip(self))]
    pub async fn switch_tenant(&self, tenant_id: &TenantId) -> ClientResult<SwitchOutcome> {
        if tenant_id.is_blank() {
            return Err(ClientError::validation("A tenant id is required"));
        }

        let tenant = {
            let mut state = self.inner.state.write();
            if state
                .active
                .as_ref()
                .is_some_and(|t| &t.tenant_id == tenant_id)
            {
                return Ok(SwitchOutcome::AlreadyActive);
            }
            if state.switching {
                debug!("switch already in progress");
                return Ok(SwitchOutcome::InProgress);
            }
            let tenant = state.tenants.get(tenant_id).cloned().ok_or_else(|| {
                ClientError::validation(format!("Tenant {tenant_id} is not available to this account"))
            })?;
            state.switching = true;
            state.active = Some(tenant.clone());
            tenant
        };
        let _switching = SwitchGuard(&self.inner);

        self.inner.persist_active(&tenant);
        let preloads = self.inner.start_preloads(&tenant.tenant_id);
        if self.inner.options.notify_backend {
            self.inner.notify_backend(tenant.tenant_id.clone());
        }
        info!(name = %tenant.display_name, "switched tenant");

        let event = TenantChanged {
            tenant_id: tenant.tenant_id.clone(),
            tenant,
        };
        self.inner.events.emit(&event).await;

        Ok(SwitchOutcome::Switched(preloads))
    }

    /// Cached `kind` for the active tenant, fetched on a miss.
    pub async fn data(&self, kind: DataKind) -> ClientResult<Value> {
        let tenant = self
            .active_tenant()
            .ok_or_else(|| ClientError::validation("No active tenant"))?;
        let api = self.inner.api.clone();
        let fetch_kind = kind.clone();
        self.inner
            .session
            .cache()
            .get_or_fetch(&tenant.tenant_id, kind, |id| async move {
                api.fetch_kind(&id, &fetch_kind).await
            })
            .await
    }

    /// Drops the active tenant's cached `kind` after a mutation.
    pub fn invalidate(&self, kind: &DataKind) -> bool {
        match self.active_tenant() {
            Some(tenant) => self.inner.session.cache().invalidate(&tenant.tenant_id, kind),
            None => false,
        }
    }

    /// Asks the backend whether `email` still resolves. Once a deletion was
    /// detected, answers `true` without asking again.
    ///
    /// Only a positive answer for the signed-in identity expires the session;
    /// any other address is reported without touching session state.
    #[instrument(skip(self))]
    pub async fn check_account_deletion(&self, email: &str) -> bool {
        if self.inner.flagged_email_matches(email) {
            debug!("deletion already detected");
            return true;
        }

        match self.inner.api.login_check(email).await {
            Ok(_) => false,
            Err(e) if e.indicates_deletion() => {
                if self.inner.is_signed_in_as(email) {
                    self.inner.flag_deleted(email).await;
                } else {
                    debug!("deleted account is not the signed-in identity");
                }
                true
            }
            Err(e) => {
                debug!(error = %e, "account check inconclusive");
                false
            }
        }
    }

    /// Focus-regained policy: check only with a known identity that is not
    /// already flagged. `None` when the check was skipped.
    pub async fn on_focus_regained(&self) -> Option<bool> {
        let identity = self.inner.session.identity()?;
        if self.account_deleted() {
            return None;
        }
        Some(self.check_account_deletion(&identity.email).await)
    }

    /// Call after an employee record was deleted. Deleting yourself ends the
    /// session right away.
    pub async fn employee_deleted(&self, email: &str) -> bool {
        self.invalidate(&DataKind::Employees);
        match self.inner.session.identity() {
            Some(identity) if identity.same_email(email) => {
                self.check_account_deletion(&identity.email).await
            }
            _ => false,
        }
    }
}

impl Inner {
    fn on_session_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::SignedIn(_) | SessionEvent::SignedOut => {
                *self.state.write() = State::default();
            }
            SessionEvent::AccountRemoved { email } => {
                let mut state = self.state.write();
                state.tenants = TenantSet::empty();
                state.active = None;
                state.deleted_email = Some(email.clone());
            }
            SessionEvent::Restored(_) | SessionEvent::Refreshed(_) => {}
        }
    }

    async fn run_load(&self, email: String) -> ClientResult<TenantSetLoad> {
        let store = self.session.store();
        let stored_role = store.get(keys::ADMIN_TYPE).and_then(|r| Role::parse(&r));

        let fetched = match stored_role {
            Some(role) if !role.is_owner() => self.api.login_check(&email).await.map(|t| vec![t]),
            _ => self.api.companies_for_user(&email).await,
        };

        // Neither outcome may land on an identity that signed in meanwhile.
        if !self.is_signed_in_as(&email) {
            return Err(ClientError::validation(
                "Session changed while tenants were loading",
            ));
        }

        let tenants = match fetched {
            Ok(tenants) => TenantSet::new(tenants),
            Err(e) if e.indicates_deletion() => {
                self.flag_deleted(&email).await;
                return Ok(TenantSetLoad::Deleted { email });
            }
            Err(e) => return Err(e),
        };

        let summaries: Vec<TenantSummary> = tenants.iter().map(TenantSummary::from).collect();
        store.set_json(keys::USER_COMPANIES, &summaries);

        let preferred = store.get(keys::LAST_SELECTED_COMPANY).map(TenantId::from);
        let active = preferred
            .as_ref()
            .and_then(|id| tenants.get(id))
            .or_else(|| tenants.first())
            .cloned();

        {
            let mut state = self.state.write();
            state.tenants = tenants.clone();
            state.active = active.clone();
        }
        if let Some(tenant) = &active {
            self.persist_active(tenant);
        }

        info!(
            count = tenants.len(),
            active = active.as_ref().map(|t| t.tenant_id.as_str()).unwrap_or("-"),
            "tenant set loaded"
        );
        Ok(TenantSetLoad::Loaded { tenants, active })
    }

    fn is_signed_in_as(&self, email: &str) -> bool {
        self.session
            .identity()
            .is_some_and(|identity| identity.same_email(email))
    }

    fn flagged_email_matches(&self, email: &str) -> bool {
        self.state
            .read()
            .deleted_email
            .as_deref()
            .is_some_and(|flagged| flagged.trim().eq_ignore_ascii_case(email.trim()))
    }

    async fn flag_deleted(&self, email: &str) {
        {
            let mut state = self.state.write();
            state.deleted_email = Some(email.to_string());
            state.tenants = TenantSet::empty();
            state.active = None;
        }
        self.session.mark_account_deleted(email).await;
    }

    /// Summary fields a reload reads back before the tenant set is fetched.
    fn persist_active(&self, tenant: &Tenant) {
        let store = self.session.store();
        store.set(keys::COMPANY_ID, tenant.tenant_id.as_str());
        store.set(keys::COMPANY_NAME, &tenant.display_name);
        store.set(keys::ADMIN_TYPE, tenant.role.as_str());
        store.set(keys::LAST_SELECTED_COMPANY, tenant.tenant_id.as_str());
    }

    fn start_preloads(&self, tenant_id: &TenantId) -> PreloadHandle {
        let mut handle = PreloadHandle::new(tenant_id.clone());
        for kind in self.options.preload_kinds() {
            let api = self.api.clone();
            let cache = Arc::clone(self.session.cache());
            let tenant_id = tenant_id.clone();
            let fetch_kind = kind.clone();
            let log_kind = kind.clone();

            let task = tokio::spawn(async move {
                let result = cache
                    .get_or_fetch(&tenant_id, fetch_kind.clone(), |id| async move {
                        api.fetch_kind(&id, &fetch_kind).await
                    })
                    .await;
                match &result {
                    Ok(_) => debug!(tenant_id = %tenant_id, kind = %log_kind, "preloaded"),
                    Err(e) => {
                        warn!(tenant_id = %tenant_id, kind = %log_kind, error = %e, "preload failed")
                    }
                }
                result.map(|_| ())
            });
            handle.push(kind, task);
        }
        handle
    }

    fn notify_backend(&self, tenant_id: TenantId) {
        let api = self.api.clone();
        tokio::spawn(async move {
            if let Err(e) = api.switch_company(&tenant_id).await {
                warn!(tenant_id = %tenant_id, error = %e, "backend was not told about the switch");
            }
        });
    }
}
