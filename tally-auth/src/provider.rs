// Identity provider seam.

use std::fmt;

use async_trait::async_trait;
use tally_core::{ClientError, ClientResult, Identity};

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.email.trim().is_empty() {
            return Err(ClientError::validation("Email is required"));
        }
        if !self.email.contains('@') {
            return Err(ClientError::validation("Email address is not valid"));
        }
        if self.password.is_empty() {
            return Err(ClientError::validation("Password is required"));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// What an OAuth redirect handed back.
#[derive(Clone, PartialEq, Eq)]
pub enum OAuthGrant {
    /// Implicit flow: the provider already issued a session.
    Tokens {
        access_token: String,
        refresh_token: Option<String>,
        expires_in: Option<i64>,
    },
    /// Authorization-code flow, optionally PKCE.
    Code {
        code: String,
        code_verifier: Option<String>,
    },
}

impl fmt::Debug for OAuthGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OAuthGrant::Tokens { expires_in, .. } => f
                .debug_struct("Tokens")
                .field("expires_in", expires_in)
                .finish_non_exhaustive(),
            OAuthGrant::Code { code_verifier, .. } => f
                .debug_struct("Code")
                .field("pkce", &code_verifier.is_some())
                .finish_non_exhaustive(),
        }
    }
}

/// The external identity provider. Every method either yields an
/// [`Identity`] or a [`ClientError`]; turning those into user-facing outcomes
/// is the session manager's job.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in_with_password(&self, credentials: &Credentials) -> ClientResult<Identity>;

    /// `Ok(None)` when the account was created but awaits e-mail confirmation.
    async fn sign_up(&self, _credentials: &Credentials) -> ClientResult<Option<Identity>> {
        Err(ClientError::validation("Sign-up is not supported by this provider"))
    }

    async fn exchange_oauth(&self, _grant: &OAuthGrant) -> ClientResult<Identity> {
        Err(ClientError::validation("OAuth sign-in is not supported by this provider"))
    }

    async fn refresh(&self, refresh_token: &str) -> ClientResult<Identity>;

    async fn sign_out(&self, access_token: &str) -> ClientResult<()>;
}
