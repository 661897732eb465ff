//! Shared reqwest client for the login, renewal and API endpoints.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};

use crate::config::ApiConfig;

pub const USER_AGENT: &str = concat!("session-core/", env!("CARGO_PKG_VERSION"));

/// Buffered JSON first, then the chunked formats the reconciler reads.
const ACCEPT_REPLIES: &str = "application/json, application/x-ndjson;q=0.9, text/event-stream;q=0.8";

/// Cloning shares the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    pub fn from_config(api: &ApiConfig) -> Self {
        HttpClientBuilder::from_config(api).build()
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings for [`HttpClient`]. Streams share the request timeout, so it
/// has to cover the longest generative reply.
#[derive(Debug, Clone)]
pub struct HttpClientBuilder {
    user_agent: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    headers: HeaderMap,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::from_config(&ApiConfig::default())
    }
}

impl HttpClientBuilder {
    pub fn from_config(api: &ApiConfig) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_REPLIES));
        Self {
            user_agent: api.user_agent.clone(),
            connect_timeout: Duration::from_secs(api.connect_timeout_secs),
            request_timeout: Duration::from_secs(api.request_timeout_secs),
            headers,
        }
    }

    #[must_use]
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = ua.into();
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// An invalid setting (e.g. a user agent with control characters) is
    /// logged and the reqwest defaults are used instead.
    pub fn build(self) -> HttpClient {
        let built = Client::builder()
            .user_agent(&self.user_agent)
            .default_headers(self.headers)
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build();
        let inner = built.unwrap_or_else(|e| {
            tracing::warn!(error = %e, user_agent = %self.user_agent, "Invalid HTTP client settings, using defaults");
            Client::default()
        });
        HttpClient { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_user_agent_carries_version() {
        assert!(USER_AGENT.starts_with("session-core/"));
        assert!(USER_AGENT.len() > "session-core/".len());
    }

    #[test]
    fn test_builder_reads_config() {
        let api = ApiConfig {
            connect_timeout_secs: 3,
            request_timeout_secs: 42,
            user_agent: "dash/1".into(),
            ..ApiConfig::default()
        };
        let builder = HttpClientBuilder::from_config(&api);
        assert_eq!(builder.connect_timeout, Duration::from_secs(3));
        assert_eq!(builder.request_timeout, Duration::from_secs(42));
        assert_eq!(builder.user_agent, "dash/1");
    }

    #[tokio::test]
    async fn test_default_headers_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", "dash/2"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::builder().user_agent("dash/2").build();
        let status = client.inner().get(server.uri()).send().await.unwrap().status();
        assert_eq!(status.as_u16(), 204);

        let received = server.received_requests().await.unwrap();
        assert_eq!(received[0].headers["accept"], ACCEPT_REPLIES);
    }
}
