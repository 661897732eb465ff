//! File-backed credential storage.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::instrument;

use super::{CredentialStorage, StorageError, validate_key};
use crate::credentials::Credential;

#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// One JSON document per key at `{dir}/{key}.json`.
///
/// Files are created owner-only on Unix and replaced atomically through a
/// temp file, so a crash mid-write never leaves a truncated credential.
#[derive(Debug, Clone)]
pub struct FileCredentialStorage {
    dir: PathBuf,
}

impl FileCredentialStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }

    fn ensure_dir(&self) -> Result<(), StorageError> {
        if self.dir.exists() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir).map_err(|e| StorageError::io(&self.dir, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(DIR_MODE))
                .map_err(|e| StorageError::io(&self.dir, e))?;
        }
        Ok(())
    }

    fn write_private(path: &Path, content: &[u8]) -> Result<(), StorageError> {
        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(FILE_MODE)
                .open(path)
                .map_err(|e| StorageError::io(path, e))?;
            file.write_all(content).map_err(|e| StorageError::io(path, e))?;
            file.sync_all().map_err(|e| StorageError::io(path, e))?;
        }

        #[cfg(not(unix))]
        std::fs::write(path, content).map_err(|e| StorageError::io(path, e))?;

        Ok(())
    }
}

impl CredentialStorage for FileCredentialStorage {
    #[instrument(skip(self))]
    fn load(&self, key: &str) -> Result<Option<Credential>, StorageError> {
        let path = self.path_for(key)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&path, e)),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StorageError::Serialization(format!("{}: {e}", path.display())))
    }

    #[instrument(skip(self, credential))]
    fn save(&self, key: &str, credential: &Credential) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        self.ensure_dir()?;

        let content = serde_json::to_vec_pretty(credential)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let temp_path = path.with_extension("tmp");
        Self::write_private(&temp_path, &content)?;

        if let Err(e) = std::fs::rename(&temp_path, &path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(StorageError::io(&path, e));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialErrorKind;
    use chrono::{Duration, Utc};

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileCredentialStorage::new(dir.path().join("nested"));

        assert!(storage.load("session").unwrap().is_none());

        let cred = Credential::new("A1", "R1", Utc::now() + Duration::minutes(30))
            .with_error(CredentialErrorKind::Rejected);
        storage.save("session", &cred).unwrap();

        let loaded = storage.load("session").unwrap().unwrap();
        assert_eq!(loaded, cred);
        assert!(!dir.path().join("nested/session.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = FileCredentialStorage::new(dir.path().join("creds"));
        storage
            .save("session", &Credential::new("A1", "R1", Utc::now()))
            .unwrap();

        let file_mode = std::fs::metadata(dir.path().join("creds/session.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);
        let dir_mode = std::fs::metadata(dir.path().join("creds"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[test]
    fn test_file_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileCredentialStorage::new(dir.path());
        storage
            .save("session", &Credential::new("A1", "R1", Utc::now()))
            .unwrap();
        storage.remove("session").unwrap();
        storage.remove("session").unwrap();
        assert!(storage.load("session").unwrap().is_none());
    }

    #[test]
    fn test_file_corrupt_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("session.json"), "{not json").unwrap();
        let storage = FileCredentialStorage::new(dir.path());
        assert!(matches!(
            storage.load("session"),
            Err(StorageError::Serialization(_))
        ));
    }

    #[test]
    fn test_file_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileCredentialStorage::new(dir.path());
        assert!(matches!(
            storage.load("../outside"),
            Err(StorageError::InvalidKey(_))
        ));
    }
}
