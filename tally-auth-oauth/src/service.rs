// OAuth service.

use std::sync::Arc;

use tally_auth::{AuthOutcome, OAuthGrant, SessionManager};
use tally_core::Identity;
use tracing::{debug, warn};

use crate::callback::parse_callback;

pub struct OAuthCompletion {
    pub identity: Identity,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OAuthError {
    pub message: String,
    pub location: Option<String>,
}

impl std::fmt::Display for OAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for OAuthError {}

/// Decides where the UI goes once the callback settles.
pub trait OAuthRedirect: Send + Sync {
    fn location(&self, outcome: Result<&Identity, &str>) -> Option<String>;
}

/// Fixed success and failure locations.
#[derive(Debug, Clone)]
pub struct StaticRedirect {
    pub success: String,
    pub failure: String,
}

impl OAuthRedirect for StaticRedirect {
    fn location(&self, outcome: Result<&Identity, &str>) -> Option<String> {
        Some(match outcome {
            Ok(_) => self.success.clone(),
            Err(message) => format!(
                "{}?error={}",
                self.failure,
                url::form_urlencoded::byte_serialize(message.as_bytes()).collect::<String>()
            ),
        })
    }
}

pub struct OAuthService {
    pub session: Arc<SessionManager>,
    pub redirect: Option<Arc<dyn OAuthRedirect>>,
}

impl OAuthService {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            redirect: None,
        }
    }

    pub fn with_redirect(mut self, redirect: Arc<dyn OAuthRedirect>) -> Self {
        self.redirect = Some(redirect);
        self
    }

    /// Storage key of the PKCE verifier saved when the flow started.
    pub fn code_verifier_key(&self) -> String {
        format!("{}-code-verifier", self.session.options().session_blob_key)
    }

    /// Parses the redirect URL and signs in with what it carries.
    pub async fn complete(&self, callback_url: &str, remember: bool) -> Result<OAuthCompletion, OAuthError> {
        let callback = match parse_callback(callback_url) {
            Ok(cb) => cb,
            Err(e) => return Err(self.failed(&e)),
        };

        let grant = match callback.grant {
            OAuthGrant::Code { code, code_verifier: None } => {
                let key = self.code_verifier_key();
                let verifier = self.session.store().get(&key);
                self.session.store().remove(&key);
                OAuthGrant::Code {
                    code,
                    code_verifier: verifier,
                }
            }
            other => other,
        };

        match self.session.sign_in_with_oauth(&grant, remember).await {
            AuthOutcome::Success(identity) => {
                debug!(user_id = %identity.id, "OAuth sign-in completed");
                let location = self.redirect.as_ref().and_then(|r| r.location(Ok(&identity)));
                Ok(OAuthCompletion { identity, location })
            }
            AuthOutcome::Failure(e) => Err(self.failed(&e)),
            AuthOutcome::PendingConfirmation { email } => {
                Err(self.failed(&format!("Confirm {email} before signing in")))
            }
        }
    }

    fn failed(&self, error: &dyn std::fmt::Display) -> OAuthError {
        let message = error.to_string();
        warn!(%message, "OAuth sign-in failed");
        let location = self.redirect.as_ref().and_then(|r| r.location(Err(&message)));
        OAuthError { message, location }
    }
}
