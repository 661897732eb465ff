//! Session credential lifecycle and authorized request core.
//!
//! A [`Session`] bundles the pieces a client needs: the credential store,
//! the lifecycle manager that renews tokens, the dispatcher that authorizes
//! requests, and the route guard that gates navigation.

pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod guard;
pub mod net;
pub mod session;
pub mod stream;

use std::sync::Arc;

use crate::config::Config;
use crate::credentials::{Clock, CredentialStore, SystemClock};
use crate::dispatch::Dispatcher;
use crate::guard::RouteGuard;
use crate::net::HttpClient;
use crate::session::{HttpAuthClient, SessionManager, SessionPolicy};

pub use error::{Error, ErrorCategory, Result};

/// Wired-up session components sharing one credential store.
#[derive(Debug, Clone)]
pub struct Session {
    pub manager: SessionManager,
    pub dispatcher: Dispatcher,
    pub guard: RouteGuard,
}

impl Session {
    /// Build every component from configuration, restoring any persisted
    /// credential from the configured storage backend.
    pub fn from_config(config: &Config) -> Result<Self> {
        let storage = credentials::storage::open(&config.storage)?;
        let store = CredentialStore::restore(storage, config.storage.key.clone());
        Self::with_store(config, store, Arc::new(SystemClock))
    }

    /// Build around an existing store and clock.
    pub fn with_store(config: &Config, store: CredentialStore, clock: Arc<dyn Clock>) -> Result<Self> {
        let http = HttpClient::from_config(&config.api);
        let auth = HttpAuthClient::new(
            http.clone(),
            config.api.login_url()?,
            config.api.refresh_url()?,
            config.session.expiry_policy(),
            clock.clone(),
        );
        let manager = SessionManager::new(
            store.clone(),
            Arc::new(auth),
            SessionPolicy::from(&config.session),
            clock.clone(),
        );
        let dispatcher = Dispatcher::from_config(config, http, manager.clone())?;
        let guard = RouteGuard::new(store, clock, config.guard.clone());
        Ok(Self {
            manager,
            dispatcher,
            guard,
        })
    }
}
