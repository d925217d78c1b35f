//! GoTrue (Supabase auth) REST provider.
//!
//! Talks to `{url}/auth/v1/*` through the same [`Transport`] seam as the rest
//! of the client. Requests carry the project `apikey` header when configured.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use http::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tally_core::{ClientError, ClientResult, Identity};
use tally_http::{error_message, interpret, OutboundRequest, RawResponse, ReqwestTransport, Transport};
use tracing::{debug, instrument};

use crate::options::GoTrueOptions;
use crate::provider::{Credentials, IdentityProvider, OAuthGrant};

const DEFAULT_EXPIRES_IN: i64 = 3600;

#[derive(Debug, Default, Deserialize)]
struct UserDto {
    id: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionDto {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: Option<UserDto>,
    // Sign-up without a session returns the bare user.
    id: Option<String>,
    email: Option<String>,
}

impl SessionDto {
    fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(|| now + Duration::seconds(self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN)))
    }

    fn into_identity(self, status: u16) -> ClientResult<Identity> {
        let now = Utc::now();
        let expires_at = self.expires_at(now);
        let user = self.user.unwrap_or_default();
        let (Some(access_token), Some(id)) = (self.access_token, user.id.or(self.id)) else {
            return Err(ClientError::unexpected_response(status));
        };
        let email = user.email.or(self.email).unwrap_or_default();
        let identity = Identity::new(id, email, access_token, expires_at);
        Ok(match self.refresh_token {
            Some(token) => identity.with_refresh_token(token),
            None => identity,
        })
    }
}

/// GoTrue puts the readable text in `error_description` or `msg`.
fn gotrue_error(raw: &RawResponse) -> ClientError {
    let message = serde_json::from_str::<Value>(&raw.body)
        .ok()
        .and_then(|v| {
            ["error_description", "msg", "message"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| error_message(raw));
    ClientError::http(raw.status, message)
}

pub struct GoTrueProvider {
    transport: Arc<dyn Transport>,
    options: GoTrueOptions,
}

impl GoTrueProvider {
    pub fn new(transport: Arc<dyn Transport>, options: GoTrueOptions) -> Self {
        Self { transport, options }
    }

    /// Production provider over reqwest.
    pub fn connect(options: GoTrueOptions, timeout: std::time::Duration) -> ClientResult<Self> {
        options.validate().map_err(ClientError::validation)?;
        let transport = ReqwestTransport::new(timeout)?;
        Ok(Self::new(Arc::new(transport), options))
    }

    pub fn options(&self) -> &GoTrueOptions {
        &self.options
    }

    fn request(&self, method: Method, path: &str) -> OutboundRequest {
        let request = OutboundRequest::new(method, self.options.endpoint(path));
        match &self.options.api_key {
            Some(key) => request.with_header("apikey", key.as_str()),
            None => request,
        }
    }

    async fn call(&self, request: OutboundRequest) -> ClientResult<(u16, Value)> {
        let raw = self.transport.send(request).await?;
        if !raw.is_success() {
            return Err(gotrue_error(&raw));
        }
        let response = interpret(raw)?;
        Ok((response.status, response.body))
    }

    async fn session(&self, request: OutboundRequest) -> ClientResult<Identity> {
        let (status, body) = self.call(request).await?;
        let dto: SessionDto =
            serde_json::from_value(body).map_err(|_| ClientError::unexpected_response(status))?;
        dto.into_identity(status)
    }
}

#[async_trait]
impl IdentityProvider for GoTrueProvider {
    #[instrument(skip_all, fields(email = %credentials.email))]
    async fn sign_in_with_password(&self, credentials: &Credentials) -> ClientResult<Identity> {
        let request = self
            .request(Method::POST, "token?grant_type=password")
            .with_body(json!({ "email": credentials.email, "password": credentials.password }));
        self.session(request).await
    }

    async fn sign_up(&self, credentials: &Credentials) -> ClientResult<Option<Identity>> {
        let mut body = json!({ "email": credentials.email, "password": credentials.password });
        if let Some(redirect) = &self.options.redirect_to {
            body["options"] = json!({ "email_redirect_to": redirect });
        }
        let (status, body) = self
            .call(self.request(Method::POST, "signup").with_body(body))
            .await?;
        let dto: SessionDto =
            serde_json::from_value(body).map_err(|_| ClientError::unexpected_response(status))?;
        if dto.access_token.is_none() {
            debug!(email = %credentials.email, "sign-up awaits e-mail confirmation");
            return Ok(None);
        }
        dto.into_identity(status).map(Some)
    }

    async fn exchange_oauth(&self, grant: &OAuthGrant) -> ClientResult<Identity> {
        match grant {
            OAuthGrant::Tokens {
                access_token,
                refresh_token,
                expires_in,
            } => {
                let (status, body) = self
                    .call(self.request(Method::GET, "user").with_bearer(access_token.as_str()))
                    .await?;
                let user: UserDto = serde_json::from_value(body)
                    .map_err(|_| ClientError::unexpected_response(status))?;
                SessionDto {
                    access_token: Some(access_token.clone()),
                    refresh_token: refresh_token.clone(),
                    expires_in: *expires_in,
                    user: Some(user),
                    ..SessionDto::default()
                }
                .into_identity(status)
            }
            OAuthGrant::Code {
                code,
                code_verifier: Some(verifier),
            } => {
                let request = self
                    .request(Method::POST, "token?grant_type=pkce")
                    .with_body(json!({ "auth_code": code, "code_verifier": verifier }));
                self.session(request).await
            }
            OAuthGrant::Code { code_verifier: None, .. } => Err(ClientError::validation(
                "Authorization code sign-in requires a PKCE code verifier",
            )),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> ClientResult<Identity> {
        let request = self
            .request(Method::POST, "token?grant_type=refresh_token")
            .with_body(json!({ "refresh_token": refresh_token }));
        self.session(request).await
    }

    async fn sign_out(&self, access_token: &str) -> ClientResult<()> {
        self.call(self.request(Method::POST, "logout").with_bearer(access_token))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_http::{Scripted, ScriptedTransport};

    fn provider(transport: Arc<ScriptedTransport>) -> GoTrueProvider {
        GoTrueProvider::new(
            transport,
            GoTrueOptions::new("https://proj.supabase.co").with_api_key("anon"),
        )
    }

    #[tokio::test]
    async fn password_sign_in_maps_the_session() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on_post(
            "token?grant_type=password",
            Scripted::ok(json!({
                "access_token": "at",
                "refresh_token": "rt",
                "expires_in": 3600,
                "user": { "id": "u1", "email": "a@b.com" }
            })),
        );
        let identity = provider(transport.clone())
            .sign_in_with_password(&Credentials::new("a@b.com", "pw"))
            .await
            .unwrap();

        assert_eq!(identity.id, "u1");
        assert_eq!(identity.refresh_token.as_deref(), Some("rt"));
        assert!(!identity.is_expired());
        let sent = &transport.requests()[0];
        assert!(sent.headers.contains(&("apikey".to_string(), "anon".to_string())));
    }

    #[tokio::test]
    async fn rejected_credentials_carry_the_description() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on_post(
            "token?grant_type=password",
            Scripted::Json(
                400,
                json!({ "error": "invalid_grant", "error_description": "Invalid login credentials" }),
            ),
        );
        let err = provider(transport)
            .sign_in_with_password(&Credentials::new("a@b.com", "bad"))
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::http(400, "Invalid login credentials"));
    }

    #[tokio::test]
    async fn sign_up_without_session_awaits_confirmation() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on_post(
            "signup",
            Scripted::ok(json!({ "id": "u2", "email": "new@b.com", "confirmation_sent_at": "now" })),
        );
        let outcome = provider(transport)
            .sign_up(&Credentials::new("new@b.com", "pw"))
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn implicit_tokens_are_completed_with_the_user() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on_get("auth/v1/user", Scripted::ok(json!({ "id": "u3", "email": "o@b.com" })));
        let grant = OAuthGrant::Tokens {
            access_token: "oauth-at".into(),
            refresh_token: None,
            expires_in: Some(60),
        };
        let identity = provider(transport.clone()).exchange_oauth(&grant).await.unwrap();
        assert_eq!(identity.email, "o@b.com");
        assert_eq!(transport.requests()[0].bearer.as_deref(), Some("oauth-at"));
    }
}
