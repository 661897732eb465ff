//! Login and renewal endpoint clients.
//!
//! Both endpoints answer with the same token-pair body:
//!
//! ```json
//! {"access_token": "...", "refresh_token": "...", "expires_in": 1800, "user": {...}}
//! ```
//!
//! `expires_in` and `user` are optional; a body missing either token is a
//! contract violation and never yields a partial credential.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument, warn};
use url::Url;

use super::error::{LoginError, RenewalError};
use crate::credentials::{Clock, Credential, ExpiryPolicy, fingerprint};
use crate::net::HttpClient;

/// Turns a refresh token into a new credential.
///
/// Implementations make exactly one attempt; retry policy belongs to the
/// caller.
#[async_trait]
pub trait TokenRenewer: Send + Sync {
    async fn renew(&self, refresh_token: &str) -> Result<Credential, RenewalError>;
}

/// Exchanges user-supplied credentials for a session.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self, credentials: &LoginCredentials) -> Result<LoginOutcome, LoginError>;
}

#[derive(Clone, Serialize)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

impl LoginCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub credential: Credential,
    /// Identity payload exactly as the backend sent it.
    pub user: serde_json::Value,
}

/// Raw token-pair body. Every field is optional here so that missing tokens
/// are reported as a contract violation rather than a decode error.
#[derive(Debug, Deserialize)]
struct TokenPairBody {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    #[serde(default)]
    user: serde_json::Value,
}

impl TokenPairBody {
    fn into_parts(self) -> Result<(String, String, Option<i64>, serde_json::Value), String> {
        let access = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or("missing access_token")?;
        let refresh = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or("missing refresh_token")?;
        Ok((access, refresh, self.expires_in, self.user))
    }
}

/// reqwest-backed client for the login and renewal endpoints.
pub struct HttpAuthClient {
    http: HttpClient,
    login_url: Url,
    refresh_url: Url,
    expiry: ExpiryPolicy,
    clock: Arc<dyn Clock>,
}

impl HttpAuthClient {
    pub fn new(
        http: HttpClient,
        login_url: Url,
        refresh_url: Url,
        expiry: ExpiryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            login_url,
            refresh_url,
            expiry,
            clock,
        }
    }

    pub fn login_url(&self) -> &Url {
        &self.login_url
    }

    pub fn refresh_url(&self) -> &Url {
        &self.refresh_url
    }

    fn credential_from(&self, access: String, refresh: String, expires_in: Option<i64>) -> Credential {
        let expires_at = self.expiry.resolve(self.clock.now(), expires_in, &access);
        Credential::new(access, refresh, expires_at)
    }
}

impl std::fmt::Debug for HttpAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAuthClient")
            .field("login_url", &self.login_url.as_str())
            .field("refresh_url", &self.refresh_url.as_str())
            .field("expiry", &self.expiry)
            .finish()
    }
}

#[async_trait]
impl TokenRenewer for HttpAuthClient {
    #[instrument(skip_all, fields(url = %self.refresh_url, token_fp = %fingerprint(refresh_token)))]
    async fn renew(&self, refresh_token: &str) -> Result<Credential, RenewalError> {
        let response = self
            .http
            .inner()
            .post(self.refresh_url.clone())
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| RenewalError::NetworkFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Renewal endpoint refused refresh token");
            return Err(RenewalError::InvalidRefreshToken {
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RenewalError::NetworkFailure(e.to_string()))?;
        let body: TokenPairBody = serde_json::from_slice(&bytes)
            .map_err(|e| RenewalError::MalformedResponse(e.to_string()))?;
        let (access, refresh, expires_in, _user) =
            body.into_parts().map_err(RenewalError::MalformedResponse)?;

        debug!(access_fp = %fingerprint(&access), "Renewal endpoint issued new token pair");
        Ok(self.credential_from(access, refresh, expires_in))
    }
}

#[async_trait]
impl Authenticator for HttpAuthClient {
    #[instrument(skip_all, fields(url = %self.login_url, username = %credentials.username))]
    async fn login(&self, credentials: &LoginCredentials) -> Result<LoginOutcome, LoginError> {
        let response = self
            .http
            .inner()
            .post(self.login_url.clone())
            .json(credentials)
            .send()
            .await
            .map_err(|e| LoginError::Network(e.to_string()))?;

        let status = response.status();
        if matches!(status.as_u16(), 400 | 401 | 403) {
            return Err(LoginError::InvalidCredentials);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LoginError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| LoginError::Network(e.to_string()))?;
        let body: TokenPairBody = serde_json::from_slice(&bytes)
            .map_err(|e| LoginError::MalformedResponse(e.to_string()))?;
        let (access, refresh, expires_in, user) =
            body.into_parts().map_err(LoginError::MalformedResponse)?;

        Ok(LoginOutcome {
            credential: self.credential_from(access, refresh, expires_in),
            user,
        })
    }
}
