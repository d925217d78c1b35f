use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use serde_json::Value;
use tally_auth::{Credentials, IdentityProvider, OAuthGrant};
use tally_core::{ClientError, ClientResult, Identity};

/// Where to send the browser, plus what to keep until the callback.
pub struct AuthorizeRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: String,
}

/// Authorization-code client for providers other than GoTrue.
pub struct OAuth2CodeExchange {
    client: BasicClient,
    scopes: Vec<String>,
    userinfo_url: String,
}

impl OAuth2CodeExchange {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: Option<String>,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
        userinfo_url: impl Into<String>,
    ) -> ClientResult<Self> {
        let invalid = |e: oauth2::url::ParseError| ClientError::validation(e.to_string());
        let client = BasicClient::new(
            ClientId::new(client_id.into()),
            client_secret.map(ClientSecret::new),
            AuthUrl::new(auth_url.into()).map_err(invalid)?,
            Some(TokenUrl::new(token_url.into()).map_err(invalid)?),
        )
        .set_redirect_uri(RedirectUrl::new(redirect_uri.into()).map_err(invalid)?);

        Ok(Self {
            client,
            scopes,
            userinfo_url: userinfo_url.into(),
        })
    }

    /// A PKCE authorize URL. Keep `state` and `code_verifier` until the
    /// callback arrives.
    pub fn authorize_url(&self) -> AuthorizeRequest {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let mut req = self
            .client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(challenge);
        for s in &self.scopes {
            req = req.add_scope(Scope::new(s.clone()));
        }
        let (url, state) = req.url();
        AuthorizeRequest {
            url: url.to_string(),
            state: state.secret().clone(),
            code_verifier: verifier.secret().clone(),
        }
    }

    async fn profile(&self, access_token: &str) -> ClientResult<(String, String)> {
        let profile = reqwest::Client::new()
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ClientError::unreachable(e.to_string()))?;
        let status = profile.status().as_u16();
        if !profile.status().is_success() {
            return Err(ClientError::http(status, "Could not load the OAuth profile"));
        }
        let profile: Value = profile
            .json()
            .await
            .map_err(|_| ClientError::unexpected_response(status))?;

        let field = |names: &[&str]| {
            names
                .iter()
                .find_map(|n| profile.get(*n))
                .and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
        };
        let id = field(&["sub", "id"]).ok_or_else(|| ClientError::unexpected_response(status))?;
        Ok((id, field(&["email"]).unwrap_or_default()))
    }

    async fn identity_from(
        &self,
        access_token: String,
        refresh_token: Option<String>,
        expires_in: Option<StdDuration>,
    ) -> ClientResult<Identity> {
        let (id, email) = self.profile(&access_token).await?;
        let ttl = expires_in
            .and_then(|d| Duration::from_std(d).ok())
            .unwrap_or_else(|| Duration::hours(1));
        let identity = Identity::new(id, email, access_token, Utc::now() + ttl);
        Ok(match refresh_token {
            Some(rt) => identity.with_refresh_token(rt),
            None => identity,
        })
    }
}

#[async_trait]
impl IdentityProvider for OAuth2CodeExchange {
    async fn sign_in_with_password(&self, _credentials: &Credentials) -> ClientResult<Identity> {
        Err(ClientError::validation(
            "Password sign-in is not available for this provider",
        ))
    }

    async fn exchange_oauth(&self, grant: &OAuthGrant) -> ClientResult<Identity> {
        let OAuthGrant::Code {
            code,
            code_verifier,
        } = grant
        else {
            return Err(ClientError::validation("Expected an authorization code"));
        };

        let mut request = self.client.exchange_code(AuthorizationCode::new(code.clone()));
        if let Some(verifier) = code_verifier {
            request = request.set_pkce_verifier(PkceCodeVerifier::new(verifier.clone()));
        }
        let token = request
            .request_async(async_http_client)
            .await
            .map_err(|e| ClientError::http(400, e.to_string()))?;

        self.identity_from(
            token.access_token().secret().clone(),
            token.refresh_token().map(|t| t.secret().clone()),
            token.expires_in(),
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> ClientResult<Identity> {
        let token = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| ClientError::http(401, e.to_string()))?;

        self.identity_from(
            token.access_token().secret().clone(),
            token
                .refresh_token()
                .map(|t| t.secret().clone())
                .or_else(|| Some(refresh_token.to_string())),
            token.expires_in(),
        )
        .await
    }

    /// Plain OAuth2 has no server-side session to end.
    async fn sign_out(&self, _access_token: &str) -> ClientResult<()> {
        Ok(())
    }
}
