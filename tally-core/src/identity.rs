//! The signed-in principal, independent of which tenant is active.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(
        id: impl Into<String>,
        email: impl Into<String>,
        access_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            access_token: access_token.into(),
            refresh_token: None,
            expires_at,
        }
    }

    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// True when the token expires within `margin` of `now`.
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at - margin <= now
    }

    /// E-mail comparison the backend uses: trimmed, case-insensitive.
    pub fn same_email(&self, other: &str) -> bool {
        self.email.trim().eq_ignore_ascii_case(other.trim())
    }
}

// Tokens never reach logs.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_tokens() {
        let identity = Identity::new("u1", "a@b.com", "secret-token", Utc::now())
            .with_refresh_token("refresh-secret");
        let rendered = format!("{identity:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(!rendered.contains("refresh-secret"));
        assert!(rendered.contains("a@b.com"));
    }

    #[test]
    fn expiry_margin() {
        let now = Utc::now();
        let identity = Identity::new("u1", "a@b.com", "t", now + Duration::seconds(30));
        assert!(!identity.is_expired_at(now));
        assert!(identity.expires_within(Duration::seconds(60), now));
        assert!(!identity.expires_within(Duration::seconds(10), now));
    }

    #[test]
    fn email_match_ignores_case_and_whitespace() {
        let identity = Identity::new("u1", "Jane@Example.com", "t", Utc::now());
        assert!(identity.same_email(" jane@example.com"));
        assert!(!identity.same_email("john@example.com"));
    }
}
