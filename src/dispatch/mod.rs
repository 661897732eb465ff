//! Authorized request dispatch.
//!
//! Every call acquires a bearer token from the [`SessionManager`], issues the
//! request and, if the backend answers 401, renews reactively and retries
//! exactly once. A second 401 is terminal.

pub mod context;
pub mod request;
pub mod response;

use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::{Config, ConfigError, StreamConfig};
use crate::credentials::fingerprint;
use crate::net::HttpClient;
use crate::session::{ReauthReason, SessionError, SessionManager};
use crate::stream::StreamError;

pub use context::RequestContext;
pub use request::{ApiRequest, RequestBody};
pub use response::{DispatchResponse, Reply, ReplyStream};

/// Header carrying the per-call correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Terminal outcome of a dispatched call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The session cannot authorize requests until the user logs in again.
    #[error("Re-authentication required ({0})")]
    AuthRequired(ReauthReason),

    /// The backend answered with a non-401 error status.
    #[error("Upstream error (HTTP {status}): {body}")]
    Upstream { status: u16, body: String },

    /// Network trouble or a renewal still pending; try again later.
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl DispatchError {
    #[must_use]
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::AuthRequired(_))
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn reauth_reason(&self) -> Option<ReauthReason> {
        match self {
            Self::AuthRequired(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl From<SessionError> for DispatchError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::ReauthRequired(reason) => Self::AuthRequired(reason),
            SessionError::Unavailable(message) => Self::Transient(message),
            SessionError::Cancelled => Self::Cancelled,
        }
    }
}

impl From<StreamError> for DispatchError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Transport(message) => Self::Transient(message),
            StreamError::Cancelled => Self::Cancelled,
            StreamError::Incomplete => Self::MalformedResponse(StreamError::Incomplete.to_string()),
        }
    }
}

/// Sends requests with the session's bearer token.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    http: HttpClient,
    session: SessionManager,
    base_url: Url,
    stream: StreamConfig,
}

impl Dispatcher {
    pub fn new(http: HttpClient, session: SessionManager, base_url: Url) -> Self {
        Self {
            http,
            session,
            base_url,
            stream: StreamConfig::default(),
        }
    }

    pub fn from_config(
        config: &Config,
        http: HttpClient,
        session: SessionManager,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(http, session, config.api.base()?).with_stream_config(config.stream.clone()))
    }

    #[must_use]
    pub fn with_stream_config(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Issue `request` with at most one retry after a 401.
    ///
    /// `ReauthRequired` from the session fails fast without any network
    /// traffic. Non-401 error statuses are returned as
    /// [`DispatchError::Upstream`] without retrying.
    #[instrument(
        skip_all,
        fields(request_id = %ctx.request_id(), method = %request.method(), path = request.path())
    )]
    pub async fn send(
        &self,
        request: &ApiRequest,
        ctx: &mut RequestContext,
    ) -> Result<DispatchResponse, DispatchError> {
        let url = request.resolve(&self.base_url)?;
        let mut token = self.session.acquire(ctx).await?;

        loop {
            let response = self.issue(request, &url, &token, ctx).await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED {
                if ctx.take_retry() {
                    debug!(token_fp = %fingerprint(&token), "401 from backend, renewing and retrying once");
                    token = self.session.renew_rejected(&token, ctx).await?;
                    continue;
                }
                warn!(token_fp = %fingerprint(&token), "401 after renewal, giving up");
                self.session.mark_rejected(&token);
                return Err(DispatchError::AuthRequired(ReauthReason::Rejected));
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                debug!(status = status.as_u16(), "Upstream error");
                return Err(DispatchError::Upstream {
                    status: status.as_u16(),
                    body,
                });
            }

            if ctx.retries_used() > 0 {
                info!(status = status.as_u16(), "Retried request succeeded");
            } else {
                debug!(status = status.as_u16(), "Request succeeded");
            }
            return Ok(DispatchResponse::new(
                response,
                self.stream.clone(),
                ctx.cancellation().clone(),
                ctx.request_id(),
            ));
        }
    }

    /// Convenience: send and classify the reply body.
    pub async fn send_for_reply(
        &self,
        request: &ApiRequest,
        ctx: &mut RequestContext,
    ) -> Result<Reply, DispatchError> {
        self.send(request, ctx).await?.into_reply().await
    }

    async fn issue(
        &self,
        request: &ApiRequest,
        url: &Url,
        token: &str,
        ctx: &RequestContext,
    ) -> Result<reqwest::Response, DispatchError> {
        let mut builder = self
            .http
            .inner()
            .request(request.method().clone(), url.clone())
            .headers(request.headers().clone())
            .bearer_auth(token)
            .header(REQUEST_ID_HEADER, ctx.request_id().to_string());

        builder = match request.body() {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Bytes { content_type, data } => {
                let content_type = HeaderValue::from_str(content_type).map_err(|e| {
                    DispatchError::InvalidRequest(format!("content type '{content_type}': {e}"))
                })?;
                builder.header(CONTENT_TYPE, content_type).body(data.clone())
            }
        };

        debug!(attempt = ctx.retries_used() + 1, "Sending request");
        tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => Err(DispatchError::Cancelled),
            result = builder.send() => result.map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Transient(format!("request timed out: {e}"))
                } else if e.is_builder() {
                    DispatchError::InvalidRequest(e.to_string())
                } else {
                    DispatchError::Transient(e.to_string())
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_mapping() {
        assert_eq!(
            DispatchError::from(SessionError::ReauthRequired(ReauthReason::Expired)),
            DispatchError::AuthRequired(ReauthReason::Expired)
        );
        assert!(DispatchError::from(SessionError::Unavailable("renewing".into())).is_transient());
        assert_eq!(DispatchError::from(SessionError::Cancelled), DispatchError::Cancelled);
    }

    #[test]
    fn test_stream_error_mapping() {
        assert!(DispatchError::from(StreamError::Transport("reset".into())).is_transient());
        assert_eq!(DispatchError::from(StreamError::Cancelled), DispatchError::Cancelled);
        assert!(matches!(
            DispatchError::from(StreamError::Incomplete),
            DispatchError::MalformedResponse(_)
        ));
    }

    #[test]
    fn test_reauth_helpers() {
        let err = DispatchError::AuthRequired(ReauthReason::Rejected);
        assert!(err.requires_reauth());
        assert_eq!(err.reauth_reason(), Some(ReauthReason::Rejected));

        let err = DispatchError::Upstream {
            status: 500,
            body: String::new(),
        };
        assert!(!err.requires_reauth());
        assert_eq!(err.reauth_reason(), None);
    }
}
