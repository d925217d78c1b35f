// Request layer options.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_core::config::keys as config_keys;
use tally_core::storage::keys;
use tally_core::ClientConfigSnapshot;

/// How the coordinator reaches the backend.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestOptions {
    /// Base URL every relative path is joined onto
    pub base_url: String,
    /// Per-request timeout enforced by the transport
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Storage key of the provider session blob the bearer token is read from
    pub session_blob_key: String,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout: Duration::from_secs(30),
            session_blob_key: keys::SESSION_BLOB.to_string(),
        }
    }
}

impl RequestOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.trim().is_empty() {
            return Err("API base URL cannot be empty".to_string());
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err("API base URL must be a valid HTTP/HTTPS URL".to_string());
        }

        if self.timeout.is_zero() {
            return Err("Request timeout must be greater than 0".to_string());
        }

        if self.session_blob_key.trim().is_empty() {
            return Err("Session blob key cannot be empty".to_string());
        }

        Ok(())
    }

    /// Reads `api.base_url` and `api.timeout_secs`, defaults elsewhere.
    pub fn from_config(cfg: &ClientConfigSnapshot) -> Result<Self, String> {
        let defaults = Self::default();
        let options = Self {
            base_url: cfg
                .get_string(config_keys::API_BASE_URL)
                .ok_or_else(|| format!("missing required config key `{}`", config_keys::API_BASE_URL))?,
            timeout: cfg
                .get_duration_secs(config_keys::API_TIMEOUT_SECS)
                .unwrap_or(defaults.timeout),
            session_blob_key: defaults.session_blob_key,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn builder() -> RequestOptionsBuilder {
        RequestOptionsBuilder::default()
    }

    /// `base_url` + `path`, with exactly one slash between them. Absolute
    /// URLs pass through untouched.
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Clone, Debug, Default)]
pub struct RequestOptionsBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
    session_blob_key: Option<String>,
}

impl RequestOptionsBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn session_blob_key(mut self, key: impl Into<String>) -> Self {
        self.session_blob_key = Some(key.into());
        self
    }

    pub fn build(self) -> RequestOptions {
        let defaults = RequestOptions::default();
        RequestOptions {
            base_url: self.base_url.unwrap_or(defaults.base_url),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            session_blob_key: self.session_blob_key.unwrap_or(defaults.session_blob_key),
        }
    }

    pub fn build_validated(self) -> Result<RequestOptions, String> {
        let options = self.build();
        options.validate()?;
        Ok(options)
    }
}
