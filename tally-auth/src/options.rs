// Session and identity-provider options.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_core::config::keys as config_keys;
use tally_core::storage::keys;
use tally_core::ClientConfigSnapshot;

/// How the session manager persists and refreshes the identity.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionOptions {
    /// Refresh when the access token expires within this margin
    #[serde(with = "humantime_serde")]
    pub refresh_margin: Duration,
    /// Tab-scoped key of the provider session blob
    pub session_blob_key: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            refresh_margin: Duration::from_secs(60),
            session_blob_key: keys::SESSION_BLOB.to_string(),
        }
    }
}

impl SessionOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.session_blob_key.trim().is_empty() {
            return Err("Session blob key cannot be empty".to_string());
        }

        if self.refresh_margin > Duration::from_secs(24 * 3600) {
            return Err("Refresh margin cannot exceed 24 hours".to_string());
        }

        Ok(())
    }

    pub fn from_config(cfg: &ClientConfigSnapshot) -> Result<Self, String> {
        let defaults = Self::default();
        let options = Self {
            refresh_margin: cfg
                .get_duration_secs(config_keys::AUTH_REFRESH_MARGIN_SECS)
                .unwrap_or(defaults.refresh_margin),
            session_blob_key: defaults.session_blob_key,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn builder() -> SessionOptionsBuilder {
        SessionOptionsBuilder::default()
    }

    pub(crate) fn margin(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.refresh_margin).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

#[derive(Clone, Debug, Default)]
pub struct SessionOptionsBuilder {
    refresh_margin: Option<Duration>,
    session_blob_key: Option<String>,
}

impl SessionOptionsBuilder {
    pub fn refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = Some(margin);
        self
    }

    pub fn session_blob_key(mut self, key: impl Into<String>) -> Self {
        self.session_blob_key = Some(key.into());
        self
    }

    pub fn build(self) -> SessionOptions {
        let defaults = SessionOptions::default();
        SessionOptions {
            refresh_margin: self.refresh_margin.unwrap_or(defaults.refresh_margin),
            session_blob_key: self.session_blob_key.unwrap_or(defaults.session_blob_key),
        }
    }

    pub fn build_validated(self) -> Result<SessionOptions, String> {
        let options = self.build();
        options.validate()?;
        Ok(options)
    }
}

/// Where the GoTrue (Supabase auth) endpoints live.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoTrueOptions {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub url: String,
    /// Anonymous API key sent as the `apikey` header
    pub api_key: Option<String>,
    /// Where e-mail confirmation and OAuth flows land afterwards
    pub redirect_to: Option<String>,
}

impl GoTrueOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            redirect_to: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_redirect_to(mut self, url: impl Into<String>) -> Self {
        self.redirect_to = Some(url.into());
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("Auth URL cannot be empty".to_string());
        }

        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err("Auth URL must be a valid HTTP/HTTPS URL".to_string());
        }

        if let Some(key) = &self.api_key {
            if key.trim().is_empty() {
                return Err("Auth API key cannot be blank when set".to_string());
            }
        }

        Ok(())
    }

    pub fn from_config(cfg: &ClientConfigSnapshot) -> Result<Self, String> {
        let options = Self {
            url: cfg
                .get_string(config_keys::AUTH_URL)
                .ok_or_else(|| format!("missing required config key `{}`", config_keys::AUTH_URL))?,
            api_key: cfg.get_string(config_keys::AUTH_API_KEY),
            redirect_to: None,
        };
        options.validate()?;
        Ok(options)
    }

    /// `{url}/auth/v1/{path}`.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/auth/v1/{}",
            self.url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::ClientConfig;

    #[test]
    fn session_defaults_and_config() {
        let options = SessionOptions::default();
        assert_eq!(options.refresh_margin, Duration::from_secs(60));
        assert!(options.validate().is_ok());

        let mut cfg = ClientConfig::new();
        cfg.set(config_keys::AUTH_REFRESH_MARGIN_SECS, "120");
        let options = SessionOptions::from_config(&cfg.snapshot()).unwrap();
        assert_eq!(options.refresh_margin, Duration::from_secs(120));
    }

    #[test]
    fn gotrue_requires_url() {
        let cfg = ClientConfig::new();
        assert!(GoTrueOptions::from_config(&cfg.snapshot()).is_err());

        let options = GoTrueOptions::new("https://proj.supabase.co/");
        assert_eq!(
            options.endpoint("/token?grant_type=password"),
            "https://proj.supabase.co/auth/v1/token?grant_type=password"
        );
    }

    #[test]
    fn blank_blob_key_is_rejected() {
        let err = SessionOptions::builder()
            .session_blob_key(" ")
            .build_validated()
            .unwrap_err();
        assert!(err.contains("blob key"));
    }
}
