//! OS keyring credential storage.

#[cfg(feature = "system-keyring")]
use super::{CredentialStorage, StorageError, validate_key};
#[cfg(feature = "system-keyring")]
use crate::credentials::Credential;
#[cfg(feature = "system-keyring")]
use tracing::instrument;

/// Stores the serialized credential as a keyring secret, one entry per key.
#[cfg(feature = "system-keyring")]
#[derive(Debug, Clone)]
pub struct KeyringCredentialStorage {
    service: String,
}

#[cfg(feature = "system-keyring")]
impl Default for KeyringCredentialStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "system-keyring")]
impl KeyringCredentialStorage {
    const SERVICE_NAME: &str = "session-core";

    pub fn new() -> Self {
        Self::with_service(Self::SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, StorageError> {
        validate_key(key)?;
        keyring::Entry::new(&self.service, key).map_err(|e| StorageError::Keyring(e.to_string()))
    }
}

#[cfg(feature = "system-keyring")]
impl CredentialStorage for KeyringCredentialStorage {
    #[instrument(skip(self))]
    fn load(&self, key: &str) -> Result<Option<Credential>, StorageError> {
        match self.entry(key)?.get_password() {
            Ok(secret) => serde_json::from_str(&secret)
                .map(Some)
                .map_err(|e| StorageError::Serialization(e.to_string())),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StorageError::Keyring(e.to_string())),
        }
    }

    #[instrument(skip(self, credential))]
    fn save(&self, key: &str, credential: &Credential) -> Result<(), StorageError> {
        let secret = serde_json::to_string(credential)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.entry(key)?
            .set_password(&secret)
            .map_err(|e| StorageError::Keyring(e.to_string()))
    }

    #[instrument(skip(self))]
    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StorageError::Keyring(e.to_string())),
        }
    }

    fn name(&self) -> &str {
        "keyring"
    }
}

#[cfg(all(test, feature = "system-keyring"))]
mod tests {
    use super::*;

    #[test]
    fn test_keyring_rejects_bad_key_before_touching_keyring() {
        let storage = KeyringCredentialStorage::with_service("session-core-test");
        assert!(matches!(storage.load("a/b"), Err(StorageError::InvalidKey(_))));
    }
}
