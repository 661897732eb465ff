//! Durable media behind the credential store.
//!
//! Backends are synchronous and keyed so several sessions (or profiles) can
//! share one medium. The store treats every failure here as non-fatal.

pub mod file;
pub mod keyring;
pub mod memory;

use std::path::PathBuf;
use std::sync::Arc;

use super::Credential;
use crate::config::{StorageBackend, StorageConfig};

pub use file::FileCredentialStorage;
pub use memory::MemoryCredentialStorage;

#[cfg(feature = "system-keyring")]
pub use keyring::KeyringCredentialStorage;

/// Errors raised by storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("Storage I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Stored credential is unreadable: {0}")]
    Serialization(String),

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Storage backend '{0}' is not available in this build")]
    Unavailable(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// A place to keep the credential between process runs.
pub trait CredentialStorage: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Credential>, StorageError>;

    fn save(&self, key: &str, credential: &Credential) -> Result<(), StorageError>;

    /// Removing a missing entry is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn name(&self) -> &str;
}

impl<T: CredentialStorage + ?Sized> CredentialStorage for Arc<T> {
    fn load(&self, key: &str) -> Result<Option<Credential>, StorageError> {
        (**self).load(key)
    }
    fn save(&self, key: &str, credential: &Credential) -> Result<(), StorageError> {
        (**self).save(key, credential)
    }
    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: CredentialStorage + ?Sized> CredentialStorage for Box<T> {
    fn load(&self, key: &str) -> Result<Option<Credential>, StorageError> {
        (**self).load(key)
    }
    fn save(&self, key: &str, credential: &Credential) -> Result<(), StorageError> {
        (**self).save(key, credential)
    }
    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Open the backend selected by the `[storage]` section.
pub fn open(config: &StorageConfig) -> Result<Arc<dyn CredentialStorage>, StorageError> {
    validate_key(&config.key)?;
    match config.backend {
        StorageBackend::File => Ok(Arc::new(FileCredentialStorage::new(&config.dir))),
        StorageBackend::Memory => Ok(Arc::new(MemoryCredentialStorage::new())),
        #[cfg(feature = "system-keyring")]
        StorageBackend::Keyring => Ok(Arc::new(KeyringCredentialStorage::new())),
        #[cfg(not(feature = "system-keyring"))]
        StorageBackend::Keyring => Err(StorageError::Unavailable("keyring".to_string())),
    }
}

/// Keys become file names and keyring accounts.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty()
        || key.contains("..")
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
