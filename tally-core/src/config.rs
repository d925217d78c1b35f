//! # Tally configuration
//!
//! A minimal string key/value store. Higher layers read typed option structs
//! out of a [`ClientConfigSnapshot`], so every crate agrees on the same keys.
//!
//! ```rust
//! use tally_core::ClientConfig;
//! let mut cfg = ClientConfig::new();
//!
//! cfg.set("api.base_url", "https://api.example.com");
//! cfg.set("api.timeout_secs", "10");
//!
//! let snap = cfg.snapshot();
//! assert_eq!(snap.get_u64("api.timeout_secs"), Some(10));
//! ```
//!
//! ## Environment overrides
//! `ClientConfig::load_env("TALLY__")` maps `TALLY__API__BASE_URL` to
//! `api.base_url`:
//!
//! ```bash
//! export TALLY__API__BASE_URL=https://api.example.com
//! export TALLY__STORAGE__DIR=$HOME/.local/share/tally
//! ```

use std::collections::HashMap;
use std::time::Duration;

/// Keys read by the Tally crates.
pub mod keys {
    pub const API_BASE_URL: &str = "api.base_url";
    pub const API_TIMEOUT_SECS: &str = "api.timeout_secs";
    pub const AUTH_URL: &str = "auth.url";
    pub const AUTH_API_KEY: &str = "auth.api_key";
    pub const AUTH_REFRESH_MARGIN_SECS: &str = "auth.refresh_margin_secs";
    pub const STORAGE_DIR: &str = "storage.dir";
    pub const TENANT_PRELOAD: &str = "tenant.preload";
}

pub const ENV_PREFIX: &str = "TALLY__";

#[derive(Debug, Default)]
pub struct ClientConfig {
    values: HashMap<String, String>,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Overlay variables starting with `prefix` onto this config.
    pub fn load_env(&mut self, prefix: &str) -> usize {
        self.load_vars(prefix, std::env::vars())
    }

    fn load_vars(&mut self, prefix: &str, vars: impl IntoIterator<Item = (String, String)>) -> usize {
        let mut applied = 0;
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                self.set(normalized, value);
                applied += 1;
            }
        }
        applied
    }

    pub fn from_env() -> Self {
        let mut cfg = Self::new();
        cfg.load_env(ENV_PREFIX);
        cfg
    }

    pub fn snapshot(&self) -> ClientConfigSnapshot {
        ClientConfigSnapshot::new(self.values.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfigSnapshot {
    map: HashMap<String, String>,
}

impl ClientConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str()).filter(|s| !s.trim().is_empty())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse::<u64>().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.trim().parse::<bool>().ok())
    }

    pub fn get_duration_secs(&self, key: &str) -> Option<Duration> {
        self.get_u64(key).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_vars_are_normalized() {
        let mut cfg = ClientConfig::new();
        let applied = cfg.load_vars(
            ENV_PREFIX,
            vec![
                ("TALLY__API__BASE_URL".to_string(), "https://api.test".to_string()),
                ("TALLY__TENANT__PRELOAD".to_string(), "false".to_string()),
                ("HOME".to_string(), "/root".to_string()),
            ],
        );
        assert_eq!(applied, 2);
        let snap = cfg.snapshot();
        assert_eq!(snap.get(keys::API_BASE_URL), Some("https://api.test"));
        assert_eq!(snap.get_bool(keys::TENANT_PRELOAD), Some(false));
        assert!(!cfg.has("home"));
    }

    #[test]
    fn blank_values_read_as_absent() {
        let mut cfg = ClientConfig::new();
        cfg.set(keys::AUTH_API_KEY, "  ");
        cfg.set(keys::API_TIMEOUT_SECS, "abc");
        let snap = cfg.snapshot();
        assert_eq!(snap.get(keys::AUTH_API_KEY), None);
        assert_eq!(snap.get_u64(keys::API_TIMEOUT_SECS), None);
    }
}
