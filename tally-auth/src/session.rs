//! # Session manager
//!
//! Owns the one live [`Identity`] and the state machine around it:
//!
//! ```text
//! Unauthenticated ──restore()──▶ Restoring ──▶ Authenticated | Unauthenticated
//! Unauthenticated ──sign_in()/OAuth──▶ Authenticated
//! Authenticated   ──sign_out()──▶ Unauthenticated
//! any             ──mark_account_deleted()──▶ Expired
//! ```
//!
//! Sign-in style calls never fail past this boundary; they return an
//! [`AuthOutcome`] the caller renders inline. Sign-out always succeeds once
//! local state is cleared.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tally_core::storage::keys;
use tally_core::{
    remember_flag, ClientError, ClientResult, EventHub, Identity, PersistedToken, SessionEvent,
    TenantCache, TokenStore,
};
use tracing::{debug, info, instrument, warn};

use crate::options::SessionOptions;
use crate::provider::{Credentials, IdentityProvider, OAuthGrant};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unauthenticated,
    Restoring,
    Authenticated(Identity),
    /// The account disappeared server-side. Grants no access.
    Expired,
}

impl SessionState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Restoring => "restoring",
            SessionState::Authenticated(_) => "authenticated",
            SessionState::Expired => "expired",
        }
    }
}

/// Result of a sign-in or sign-up attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    Success(Identity),
    /// Account created; nothing is signed in until the e-mail is confirmed.
    PendingConfirmation { email: String },
    Failure(ClientError),
}

impl AuthOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AuthOutcome::Success(_))
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            AuthOutcome::Success(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ClientError> {
        match self {
            AuthOutcome::Failure(e) => Some(e),
            _ => None,
        }
    }
}

struct Inner {
    state: SessionState,
    account_removed: bool,
}

pub struct SessionManager {
    provider: Arc<dyn IdentityProvider>,
    store: TokenStore,
    cache: Arc<TenantCache>,
    options: SessionOptions,
    inner: RwLock<Inner>,
    events: EventHub<SessionEvent>,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: TokenStore,
        cache: Arc<TenantCache>,
        options: SessionOptions,
    ) -> Self {
        Self {
            provider,
            store,
            cache,
            options,
            inner: RwLock::new(Inner {
                state: SessionState::Unauthenticated,
                account_removed: false,
            }),
            events: EventHub::new(),
        }
    }

    /// Builds the manager and runs [`restore`](Self::restore).
    pub async fn init(
        provider: Arc<dyn IdentityProvider>,
        store: TokenStore,
        cache: Arc<TenantCache>,
        options: SessionOptions,
    ) -> Arc<Self> {
        let manager = Arc::new(Self::new(provider, store, cache, options));
        manager.restore().await;
        manager
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().state.clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.read().state.identity().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.inner.read().state, SessionState::Authenticated(_))
    }

    /// Set once a deletion was detected, until the next successful sign-in.
    pub fn account_removed(&self) -> bool {
        self.inner.read().account_removed
    }

    pub fn events(&self) -> &EventHub<SessionEvent> {
        &self.events
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn cache(&self) -> &Arc<TenantCache> {
        &self.cache
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    fn set_state(&self, state: SessionState) {
        let mut inner = self.inner.write();
        debug!(from = inner.state.name(), to = state.name(), "session transition");
        inner.state = state;
    }

    /// Recovers a persisted session.
    ///
    /// Order: a live tab-scoped session blob, then (with "remember me") the
    /// durable token, then a refresh with whichever refresh token survived.
    pub async fn restore(&self) -> SessionState {
        self.set_state(SessionState::Restoring);

        let now = Utc::now();
        let blob_key = &self.options.session_blob_key;
        let remember = remember_flag(&self.store);
        let blob = PersistedToken::read_session_blob(&self.store, blob_key);

        if let Some(token) = blob.as_ref().filter(|t| t.is_live_at(now)) {
            return self.restored(Identity::from(token.clone())).await;
        }

        let durable = if remember {
            PersistedToken::read_durable(&self.store)
        } else {
            None
        };

        if let Some(token) = durable.as_ref().filter(|t| t.is_live_at(now)) {
            token.write_session_blob(&self.store, blob_key);
            return self.restored(Identity::from(token.clone())).await;
        }

        let refresh_token = durable
            .and_then(|t| t.refresh_token)
            .or_else(|| blob.and_then(|t| t.refresh_token));

        if let Some(refresh_token) = refresh_token {
            match self.provider.refresh(&refresh_token).await {
                Ok(identity) => {
                    self.persist(&identity, remember);
                    return self.restored(identity).await;
                }
                Err(e) => {
                    warn!(error = %e, "stored session could not be refreshed");
                    self.forget_token();
                }
            }
        }

        self.set_state(SessionState::Unauthenticated);
        SessionState::Unauthenticated
    }

    async fn restored(&self, identity: Identity) -> SessionState {
        info!(user_id = %identity.id, "session restored");
        let state = SessionState::Authenticated(identity.clone());
        self.set_state(state.clone());
        self.events.emit(&SessionEvent::Restored(identity)).await;
        state
    }

    #[instrument(skip_all, fields(email = %credentials.email, remember = remember))]
    pub async fn sign_in(&self, credentials: &Credentials, remember: bool) -> AuthOutcome {
        if let Err(e) = credentials.validate() {
            return AuthOutcome::Failure(e);
        }
        match self.provider.sign_in_with_password(credentials).await {
            Ok(identity) => self.established(identity, remember).await,
            Err(e) => {
                debug!(error = %e, "sign-in rejected");
                AuthOutcome::Failure(e)
            }
        }
    }

    pub async fn sign_up(&self, credentials: &Credentials, remember: bool) -> AuthOutcome {
        if let Err(e) = credentials.validate() {
            return AuthOutcome::Failure(e);
        }
        match self.provider.sign_up(credentials).await {
            Ok(Some(identity)) => self.established(identity, remember).await,
            Ok(None) => AuthOutcome::PendingConfirmation {
                email: credentials.email.trim().to_string(),
            },
            Err(e) => AuthOutcome::Failure(e),
        }
    }

    pub async fn sign_in_with_oauth(&self, grant: &OAuthGrant, remember: bool) -> AuthOutcome {
        match self.provider.exchange_oauth(grant).await {
            Ok(identity) => self.established(identity, remember).await,
            Err(e) => AuthOutcome::Failure(e),
        }
    }

    async fn established(&self, identity: Identity, remember: bool) -> AuthOutcome {
        let previous = self.identity().map(|i| i.id);
        if previous.as_deref() != Some(identity.id.as_str()) {
            // Cached lists were fetched under the previous identity's role.
            let dropped = self.cache.invalidate_all();
            debug!(dropped, "tenant cache cleared for new identity");
        }
        self.persist(&identity, remember);
        {
            let mut inner = self.inner.write();
            inner.state = SessionState::Authenticated(identity.clone());
            inner.account_removed = false;
        }
        info!(user_id = %identity.id, remember, "signed in");
        self.events.emit(&SessionEvent::SignedIn(identity.clone())).await;
        AuthOutcome::Success(identity)
    }

    /// Writes the session blob always, and the durable token only when
    /// `remember` is on.
    fn persist(&self, identity: &Identity, remember: bool) {
        let token = PersistedToken::from(identity);
        token.write_session_blob(&self.store, &self.options.session_blob_key);
        self.store
            .set(keys::REMEMBER_ME, if remember { "true" } else { "false" });
        if remember {
            token.write_durable(&self.store);
        } else {
            PersistedToken::remove_durable(&self.store);
        }
    }

    fn forget_token(&self) {
        self.store.remove(&self.options.session_blob_key);
        PersistedToken::remove_durable(&self.store);
    }

    /// Exchanges the refresh token for a new access token, keeping the
    /// original "remember me" choice.
    pub async fn refresh(&self) -> ClientResult<Identity> {
        let current = self
            .identity()
            .ok_or_else(|| ClientError::validation("No active session to refresh"))?;
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or_else(|| ClientError::validation("Session has no refresh token"))?;

        let identity = self.provider.refresh(refresh_token).await?;
        // A sign-out or deletion while the call was out wins.
        if !self.is_authenticated() {
            return Err(ClientError::validation("Session ended during refresh"));
        }
        self.persist(&identity, remember_flag(&self.store));
        self.set_state(SessionState::Authenticated(identity.clone()));
        self.events.emit(&SessionEvent::Refreshed(identity.clone())).await;
        Ok(identity)
    }

    /// Refreshes only when the token expires within the configured margin.
    pub async fn ensure_fresh(&self) -> ClientResult<Identity> {
        let current = self
            .identity()
            .ok_or_else(|| ClientError::validation("No active session"))?;
        if current.expires_within(self.options.margin(), Utc::now()) {
            self.refresh().await
        } else {
            Ok(current)
        }
    }

    /// Ends the session. Local state is cleared whatever the provider says.
    pub async fn sign_out(&self) {
        let token = self.identity().map(|i| i.access_token);
        if let Some(token) = token {
            match self.provider.sign_out(&token).await {
                Ok(()) => {}
                Err(e) if e.status() == Some(403) => {
                    debug!("session already ended remotely");
                }
                Err(e) => warn!(error = %e, "remote sign-out failed, clearing local session anyway"),
            }
        }

        self.clear_local();
        {
            let mut inner = self.inner.write();
            inner.state = SessionState::Unauthenticated;
            inner.account_removed = false;
        }
        info!("signed out");
        self.events.emit(&SessionEvent::SignedOut).await;
    }

    fn clear_local(&self) {
        self.store.clear_all();
        let dropped = self.cache.invalidate_all();
        debug!(dropped, "tenant cache cleared");
    }

    /// Flips to [`SessionState::Expired`] after the backing account was found
    /// missing. Returns false when already flagged.
    pub async fn mark_account_deleted(&self, email: &str) -> bool {
        {
            let mut inner = self.inner.write();
            if inner.account_removed && inner.state == SessionState::Expired {
                return false;
            }
            inner.state = SessionState::Expired;
            inner.account_removed = true;
        }
        warn!(%email, "account no longer exists, session expired");
        self.clear_local();
        self.events
            .emit(&SessionEvent::AccountRemoved {
                email: email.to_string(),
            })
            .await;
        true
    }
}
