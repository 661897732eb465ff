#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use session_core::Session;
use session_core::config::Config;
use session_core::credentials::{Clock, Credential, CredentialStore, ManualClock};

pub const LOGIN_PATH: &str = "/api/auth/login";
pub const REFRESH_PATH: &str = "/api/auth/refresh";

/// A session wired against a mock backend with a hand-driven clock.
pub struct Harness {
    pub server: MockServer,
    pub clock: Arc<ManualClock>,
    pub session: Session,
}

impl Harness {
    pub async fn start() -> Self {
        Self::build(|_| {}, None).await
    }

    /// Start with `access`/`refresh` already stored, valid for 30 minutes.
    pub async fn logged_in(access: &str, refresh: &str) -> Self {
        Self::build(|_| {}, Some((access, refresh))).await
    }

    pub async fn build(tweak: impl FnOnce(&mut Config), seed: Option<(&str, &str)>) -> Self {
        let server = MockServer::start().await;
        let clock = Arc::new(ManualClock::starting_now());

        let mut config = Config::default();
        config.api.base_url = server.uri();
        tweak(&mut config);

        let store = match seed {
            Some((access, refresh)) => CredentialStore::with_credential(Credential::new(
                access,
                refresh,
                clock.now() + chrono::Duration::minutes(30),
            )),
            None => CredentialStore::new(),
        };
        let session = Session::with_store(&config, store, clock.clone()).unwrap();

        Self {
            server,
            clock,
            session,
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.session.manager.store().get().map(|c| c.access_token)
    }
}

pub fn token_pair(access: &str, refresh: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
        "user": {"id": 7, "username": "alice"}
    }))
}

pub async fn mount_login(server: &MockServer, access: &str, refresh: &str) {
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(token_pair(access, refresh))
        .expect(1)
        .mount(server)
        .await;
}

/// Renewal of `from_refresh` answering with a new pair, expected `times` times.
pub async fn mount_refresh(
    server: &MockServer,
    from_refresh: &str,
    access: &str,
    refresh: &str,
    times: u64,
) {
    mount_refresh_delayed(server, from_refresh, access, refresh, times, Duration::ZERO).await;
}

pub async fn mount_refresh_delayed(
    server: &MockServer,
    from_refresh: &str,
    access: &str,
    refresh: &str,
    times: u64,
    delay: Duration,
) {
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({"refresh_token": from_refresh})))
        .respond_with(token_pair(access, refresh).set_delay(delay))
        .expect(times)
        .mount(server)
        .await;
}
