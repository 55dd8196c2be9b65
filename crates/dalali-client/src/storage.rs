//! Durable storage for the session credential.
//!
//! Storage holds exactly one entry of interest, the credential under
//! [`CREDENTIAL_KEY`]. Whether it is present decides whether requests carry an
//! `Authorization` header and whether the realtime handshake is authenticated.

use dalali_core::Credential;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Key the credential is stored under.
pub const CREDENTIAL_KEY: &str = "token";

pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Option<Credential>;
    fn save(&self, credential: &Credential) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

/// Process-local store. Forgets the credential on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slot: Mutex<Option<Credential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Option<Credential> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn save(&self, credential: &Credential) -> Result<(), StorageError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// A small JSON key/value file.
///
/// Other keys in the file are preserved.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn load(&self) -> Option<Credential> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let map = match self.read_map() {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!("Unreadable credential store {}: {}", self.path.display(), e);
                return None;
            }
        };
        let raw = map.get(CREDENTIAL_KEY)?;
        match raw.parse() {
            Ok(credential) => Some(credential),
            Err(e) => {
                tracing::warn!("Ignoring stored credential: {}", e);
                None
            }
        }
    }

    fn save(&self, credential: &Credential) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = self.read_map().unwrap_or_default();
        map.insert(CREDENTIAL_KEY.to_string(), credential.to_string());
        self.write_map(&map)
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = self.read_map().unwrap_or_default();
        if map.remove(CREDENTIAL_KEY).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("credential store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential store is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(s: &str) -> Credential {
        s.parse().unwrap()
    }

    #[test]
    fn memory_store_lifecycle() {
        let store = MemoryStore::new();
        assert!(store.load().is_none());
        store.save(&cred("t1")).unwrap();
        assert_eq!(store.load(), Some(cred("t1")));
        store.clear().unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        FileStore::new(&path).save(&cred("t2")).unwrap();
        assert_eq!(FileStore::new(&path).load(), Some(cred("t2")));

        FileStore::new(&path).clear().unwrap();
        assert!(FileStore::new(&path).load().is_none());
    }

    #[test]
    fn file_store_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{"theme":"dark"}"#).unwrap();

        let store = FileStore::new(&path);
        store.save(&cred("t3")).unwrap();
        store.clear().unwrap();

        let left: BTreeMap<String, String> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(left.get("theme").map(String::as_str), Some("dark"));
        assert!(!left.contains_key(CREDENTIAL_KEY));
    }

    #[test]
    fn corrupt_file_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{{{").unwrap();
        assert!(FileStore::new(&path).load().is_none());
    }
}
