//! Durable representation of an [`Identity`], enough to restore a session.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::storage::{keys, TokenStore};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedToken {
    pub user_id: String,
    pub email: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for PersistedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedToken")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl From<&Identity> for PersistedToken {
    fn from(identity: &Identity) -> Self {
        Self {
            user_id: identity.id.clone(),
            email: identity.email.clone(),
            access_token: identity.access_token.clone(),
            refresh_token: identity.refresh_token.clone(),
            expires_at: identity.expires_at,
        }
    }
}

impl From<PersistedToken> for Identity {
    fn from(t: PersistedToken) -> Self {
        Identity {
            id: t.user_id,
            email: t.email,
            access_token: t.access_token,
            refresh_token: t.refresh_token,
            expires_at: t.expires_at,
        }
    }
}

impl PersistedToken {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Reads the tab-scoped provider blob.
    pub fn read_session_blob(store: &TokenStore, blob_key: &str) -> Option<Self> {
        store.get_json(blob_key)
    }

    pub fn write_session_blob(&self, store: &TokenStore, blob_key: &str) {
        store.set_json(blob_key, self);
    }

    /// Reads the token fields written under durable keys when "remember me" is on.
    pub fn read_durable(store: &TokenStore) -> Option<Self> {
        let access_token = store.get(keys::ACCESS_TOKEN)?;
        let expires_at = store
            .get(keys::TOKEN_EXPIRES_AT)
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc))?;
        Some(Self {
            user_id: store.get(keys::USER_ID).unwrap_or_default(),
            email: store.get(keys::ADMIN_MAIL).unwrap_or_default(),
            access_token,
            refresh_token: store.get(keys::REFRESH_TOKEN),
            expires_at,
        })
    }

    pub fn write_durable(&self, store: &TokenStore) {
        store.set(keys::ACCESS_TOKEN, &self.access_token);
        store.set(keys::TOKEN_EXPIRES_AT, &self.expires_at.to_rfc3339());
        store.set(keys::USER_ID, &self.user_id);
        store.set(keys::ADMIN_MAIL, &self.email);
        match &self.refresh_token {
            Some(t) => store.set(keys::REFRESH_TOKEN, t),
            None => store.remove(keys::REFRESH_TOKEN),
        }
    }

    pub fn remove_durable(store: &TokenStore) {
        for key in [
            keys::ACCESS_TOKEN,
            keys::TOKEN_EXPIRES_AT,
            keys::USER_ID,
            keys::ADMIN_MAIL,
            keys::REFRESH_TOKEN,
        ] {
            store.remove(key);
        }
    }

    /// Bearer token for outgoing calls: the live session blob first, the
    /// durable copy second.
    pub fn bearer(store: &TokenStore, blob_key: &str) -> Option<String> {
        Self::read_session_blob(store, blob_key)
            .map(|t| t.access_token)
            .or_else(|| store.get(keys::ACCESS_TOKEN))
            .filter(|t| !t.trim().is_empty())
    }
}

/// Reads the stored "remember me" flag.
pub fn remember_flag(store: &TokenStore) -> bool {
    store
        .get(keys::REMEMBER_ME)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token() -> PersistedToken {
        PersistedToken::from(
            &Identity::new("u1", "a@b.com", "tok-1", Utc::now() + Duration::hours(1))
                .with_refresh_token("r-1"),
        )
    }

    #[test]
    fn durable_fields_roundtrip_through_store() {
        let store = TokenStore::in_memory();
        let t = token();
        t.write_durable(&store);
        let read = PersistedToken::read_durable(&store).unwrap();
        assert_eq!(read.user_id, "u1");
        assert_eq!(read.refresh_token.as_deref(), Some("r-1"));
        assert_eq!(read.expires_at.timestamp(), t.expires_at.timestamp());

        PersistedToken::remove_durable(&store);
        assert!(PersistedToken::read_durable(&store).is_none());
        assert_eq!(store.get(keys::ADMIN_MAIL), None);
        assert_eq!(store.get(keys::USER_ID), None);
    }

    #[test]
    fn bearer_prefers_session_blob() {
        let store = TokenStore::in_memory();
        assert_eq!(PersistedToken::bearer(&store, keys::SESSION_BLOB), None);

        store.set(keys::ACCESS_TOKEN, "durable-tok");
        assert_eq!(
            PersistedToken::bearer(&store, keys::SESSION_BLOB).as_deref(),
            Some("durable-tok")
        );

        token().write_session_blob(&store, keys::SESSION_BLOB);
        assert_eq!(
            PersistedToken::bearer(&store, keys::SESSION_BLOB).as_deref(),
            Some("tok-1")
        );
    }

    #[test]
    fn remember_flag_defaults_to_false() {
        let store = TokenStore::in_memory();
        assert!(!remember_flag(&store));
        store.set(keys::REMEMBER_ME, "TRUE");
        assert!(remember_flag(&store));
    }
}
