//! The single live credential cell.
//!
//! Reads are open to everyone holding a handle; writes are crate-private so
//! that only the session manager can change what is stored. Every change is
//! published to subscribers and written through to the configured storage.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::Credential;
use super::storage::CredentialStorage;

/// Default key under which the credential is persisted.
pub const DEFAULT_STORAGE_KEY: &str = "session";

/// Cheaply cloneable handle to the credential cell.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<Inner>,
}

struct Inner {
    cell: watch::Sender<Option<Credential>>,
    storage: Option<Arc<dyn CredentialStorage>>,
    key: String,
}

impl CredentialStore {
    /// Empty, memory-only store.
    pub fn new() -> Self {
        Self::build(None, None, DEFAULT_STORAGE_KEY)
    }

    /// Store seeded with an existing credential and no persistence.
    pub fn with_credential(credential: Credential) -> Self {
        Self::build(Some(credential), None, DEFAULT_STORAGE_KEY)
    }

    /// Store that writes through to `storage` under `key`, starting from
    /// whatever that storage already holds.
    ///
    /// A storage read failure starts the session anonymous.
    pub fn restore(storage: Arc<dyn CredentialStorage>, key: impl Into<String>) -> Self {
        let key = key.into();
        let initial = match storage.load(&key) {
            Ok(found) => {
                if found.is_some() {
                    info!(backend = storage.name(), "Restored credential from storage");
                }
                found
            }
            Err(e) => {
                warn!(backend = storage.name(), error = %e, "Failed to load stored credential");
                None
            }
        };
        Self::build(initial, Some(storage), &key)
    }

    fn build(
        initial: Option<Credential>,
        storage: Option<Arc<dyn CredentialStorage>>,
        key: &str,
    ) -> Self {
        let (cell, _) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                cell,
                storage,
                key: key.to_string(),
            }),
        }
    }

    /// Snapshot of the current credential.
    pub fn get(&self) -> Option<Credential> {
        self.inner.cell.borrow().clone()
    }

    /// Receive every subsequent change.
    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.inner.cell.subscribe()
    }

    pub(crate) fn set(&self, credential: Credential) {
        self.inner.cell.send_replace(Some(credential.clone()));
        self.persist(Some(&credential));
    }

    pub(crate) fn clear(&self) {
        let previous = self.inner.cell.send_replace(None);
        if previous.is_some() {
            self.persist(None);
        }
    }

    /// Apply `f` atomically against the current value. `f` returns whether it
    /// changed anything; only then are subscribers notified and storage
    /// updated.
    pub(crate) fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut Option<Credential>) -> bool,
    {
        let changed = self.inner.cell.send_if_modified(f);
        if changed {
            let current = self.get();
            self.persist(current.as_ref());
        }
        changed
    }

    fn persist(&self, credential: Option<&Credential>) {
        let Some(storage) = &self.inner.storage else {
            return;
        };
        let result = match credential {
            Some(c) => storage.save(&self.inner.key, c),
            None => storage.remove(&self.inner.key),
        };
        match result {
            Ok(()) => debug!(backend = storage.name(), "Persisted credential change"),
            Err(e) => warn!(backend = storage.name(), error = %e, "Failed to persist credential"),
        }
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("credential", &*self.inner.cell.borrow())
            .field("storage", &self.inner.storage.as_ref().map(|s| s.name().to_string()))
            .field("key", &self.inner.key)
            .finish()
    }
}
