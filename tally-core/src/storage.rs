//! # Token storage
//!
//! Two storage tiers sit behind one [`TokenStore`]:
//! - the **session tier** lives as long as the tab/process and holds the
//!   identity provider's raw session blob
//! - the **durable tier** survives restarts and holds preferences, the
//!   selected company and, when "remember me" is on, the persisted token
//!
//! A single [`KeyPolicy`] decides which tier a key belongs to. Tier failures
//! (a read-only disk, private browsing) are swallowed: the store degrades to
//! "nothing stored" instead of failing the caller.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::errors::{ClientError, ClientResult};

/// Fixed key names. They must stay stable across releases because a reload
/// reads what the previous run wrote.
pub mod keys {
    pub const COMPANY_ID: &str = "companyID";
    pub const COMPANY_NAME: &str = "companyName";
    pub const ADMIN_TYPE: &str = "adminType";
    pub const ADMIN_MAIL: &str = "adminMail";
    pub const USER_COMPANIES: &str = "userCompanies";
    pub const LAST_SELECTED_COMPANY: &str = "lastSelectedCompany";
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const TOKEN_EXPIRES_AT: &str = "tokenExpiresAt";
    pub const USER_ID: &str = "userId";
    pub const REMEMBER_ME: &str = "rememberMe";

    /// Default name of the provider session blob (tab-scoped only).
    pub const SESSION_BLOB: &str = "sb-tally-auth-token";
}

/// Which tier a key is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Session,
    Durable,
}

/// One backing store. Implementations must be internally synchronized.
pub trait StorageTier: Send + Sync {
    fn get(&self, key: &str) -> ClientResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> ClientResult<()>;
    fn remove(&self, key: &str) -> ClientResult<()>;
    fn clear(&self) -> ClientResult<()>;
}

/// Process-lifetime tier; the natural session tier.
#[derive(Debug, Default)]
pub struct MemoryTier {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageTier for MemoryTier {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        self.values.write().remove(key);
        Ok(())
    }

    fn clear(&self) -> ClientResult<()> {
        self.values.write().clear();
        Ok(())
    }
}

/// Durable tier persisted as a single JSON object on disk.
///
/// The whole document is rewritten on every mutation through a temp file and
/// a rename, so a crash never leaves a half-written file behind.
pub struct FileTier {
    path: PathBuf,
    values: Mutex<Option<BTreeMap<String, String>>>,
}

impl FileTier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            values: Mutex::new(None),
        }
    }

    /// `<dir>/tally-storage.json`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join("tally-storage.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> ClientResult<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(values) => Ok(values),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "durable storage is unreadable; starting empty"
                    );
                    Ok(BTreeMap::new())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> ClientResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn with_values<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> (T, bool),
    ) -> ClientResult<T> {
        let mut guard = self.values.lock();
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        let values = guard
            .as_mut()
            .ok_or_else(|| ClientError::storage("durable tier failed to load"))?;
        let (out, dirty) = f(values);
        if dirty {
            self.persist(values)?;
        }
        Ok(out)
    }
}

impl StorageTier for FileTier {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        self.with_values(|v| (v.get(key).cloned(), false))
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.with_values(|v| {
            let changed = v.get(key).map(String::as_str) != Some(value);
            v.insert(key.to_string(), value.to_string());
            ((), changed)
        })
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        self.with_values(|v| ((), v.remove(key).is_some()))
    }

    /// Rewrites the document without reading the old one.
    fn clear(&self) -> ClientResult<()> {
        let mut guard = self.values.lock();
        let empty = BTreeMap::new();
        self.persist(&empty)?;
        *guard = Some(empty);
        Ok(())
    }
}

/// A tier that refuses everything, like storage in a locked-down browser profile.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableTier;

impl StorageTier for UnavailableTier {
    fn get(&self, _key: &str) -> ClientResult<Option<String>> {
        Err(ClientError::storage("storage unavailable"))
    }

    fn set(&self, _key: &str, _value: &str) -> ClientResult<()> {
        Err(ClientError::storage("storage unavailable"))
    }

    fn remove(&self, _key: &str) -> ClientResult<()> {
        Err(ClientError::storage("storage unavailable"))
    }

    fn clear(&self) -> ClientResult<()> {
        Err(ClientError::storage("storage unavailable"))
    }
}

/// Keys matching `prefix … suffix` are session-token keys and never leave
/// the session tier, even when the user opted into "remember me".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPolicy {
    pub session_prefix: String,
    pub session_suffix: String,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            session_prefix: "sb-".to_string(),
            session_suffix: "-auth-token".to_string(),
        }
    }
}

impl KeyPolicy {
    pub fn tier_for(&self, key: &str) -> Tier {
        let min_len = self.session_prefix.len() + self.session_suffix.len();
        if key.len() > min_len
            && key.starts_with(&self.session_prefix)
            && key.ends_with(&self.session_suffix)
        {
            Tier::Session
        } else {
            Tier::Durable
        }
    }
}

/// Key/value persistence over the two tiers.
#[derive(Clone)]
pub struct TokenStore {
    session: Arc<dyn StorageTier>,
    durable: Arc<dyn StorageTier>,
    policy: KeyPolicy,
}

impl TokenStore {
    pub fn new(session: Arc<dyn StorageTier>, durable: Arc<dyn StorageTier>) -> Self {
        Self {
            session,
            durable,
            policy: KeyPolicy::default(),
        }
    }

    /// Both tiers in memory; handy for tests and throwaway sessions.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTier::new()), Arc::new(MemoryTier::new()))
    }

    pub fn with_policy(mut self, policy: KeyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &KeyPolicy {
        &self.policy
    }

    pub fn tier_for(&self, key: &str) -> Tier {
        self.policy.tier_for(key)
    }

    fn tier(&self, key: &str) -> &dyn StorageTier {
        match self.tier_for(key) {
            Tier::Session => self.session.as_ref(),
            Tier::Durable => self.durable.as_ref(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.tier(key).get(key) {
            Ok(v) => v,
            Err(e) => {
                debug!(key, error = %e, "storage read failed; treating as absent");
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        if let Err(e) = self.tier(key).set(key, value) {
            warn!(key, error = %e, "storage write failed; value not persisted");
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(e) = self.tier(key).remove(key) {
            debug!(key, error = %e, "storage remove failed");
        }
    }

    /// Wipes both tiers. The only call sign-out code needs; never fails.
    pub fn clear_all(&self) {
        if let Err(e) = self.session.clear() {
            debug!(error = %e, "session tier clear failed");
        }
        if let Err(e) = self.durable.clear() {
            debug!(error = %e, "durable tier clear failed");
        }
    }

    pub fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(key, error = %e, "stored value is not valid JSON; ignoring");
                None
            }
        }
    }

    pub fn set_json<T: serde::Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw),
            Err(e) => warn!(key, error = %e, "could not serialize value for storage"),
        }
    }
}
