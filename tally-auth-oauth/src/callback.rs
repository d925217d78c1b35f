// OAuth redirect callback parsing.

use std::collections::HashMap;

use tally_auth::OAuthGrant;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    #[error("invalid callback URL: {0}")]
    InvalidUrl(String),
    #[error("{description}")]
    Denied { error: String, description: String },
    #[error("callback URL carries neither tokens nor an authorization code")]
    MissingCredentials,
}

/// A parsed redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCallback {
    pub grant: OAuthGrant,
    /// The opaque `state` echoed back by the provider, if any.
    pub state: Option<String>,
}

fn pairs(raw: Option<&str>) -> HashMap<String, String> {
    raw.map(|s| {
        url::form_urlencoded::parse(s.as_bytes())
            .into_owned()
            .filter(|(_, v)| !v.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// Reads the implicit-flow fragment (`#access_token=...`) or the
/// authorization-code query (`?code=...`). Provider errors may arrive in
/// either place.
pub fn parse_callback(raw: &str) -> Result<OAuthCallback, CallbackError> {
    let url = Url::parse(raw).map_err(|e| CallbackError::InvalidUrl(e.to_string()))?;
    let fragment = pairs(url.fragment());
    let query = pairs(url.query());
    let param = |name: &str| fragment.get(name).or_else(|| query.get(name)).cloned();

    if let Some(error) = param("error") {
        let description = param("error_description").unwrap_or_else(|| error.replace('_', " "));
        return Err(CallbackError::Denied { error, description });
    }

    let state = param("state");

    if let Some(access_token) = fragment.get("access_token").cloned() {
        let expires_in = fragment.get("expires_in").and_then(|v| v.parse::<i64>().ok());
        return Ok(OAuthCallback {
            grant: OAuthGrant::Tokens {
                access_token,
                refresh_token: fragment.get("refresh_token").cloned(),
                expires_in,
            },
            state,
        });
    }

    match query.get("code") {
        Some(code) => Ok(OAuthCallback {
            grant: OAuthGrant::Code {
                code: code.clone(),
                code_verifier: None,
            },
            state,
        }),
        None => Err(CallbackError::MissingCredentials),
    }
}
