//! In-memory credential storage.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::{CredentialStorage, StorageError, validate_key};
use crate::credentials::Credential;

/// Ephemeral storage; forgets everything when dropped.
#[derive(Debug, Default)]
pub struct MemoryCredentialStorage {
    entries: RwLock<HashMap<String, Credential>>,
}

impl MemoryCredentialStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialStorage for MemoryCredentialStorage {
    fn load(&self, key: &str) -> Result<Option<Credential>, StorageError> {
        validate_key(key)?;
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, credential: &Credential) -> Result<(), StorageError> {
        validate_key(key)?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), credential.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
