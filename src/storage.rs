//! Local key/value persistence for state that must survive a reload.
//!
//! SYSTEM CONTEXT
//! ==============
//! The identity cache and the presence store both persist JSON documents
//! through this seam. `MemoryStorage` backs tests and ephemeral sessions;
//! `FileStorage` keeps one `<key>.json` file per document in a state directory.
//!
//! ERROR HANDLING
//! ==============
//! File writes go through a temp file + rename so a crash mid-write leaves the
//! previous document intact rather than a truncated one.

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{ErrorCode, lock};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io failed for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON document for {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),
}

impl ErrorCode for StorageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "E_STORAGE_IO",
            Self::Json { .. } => "E_STORAGE_JSON",
            Self::InvalidKey(_) => "E_STORAGE_KEY",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

/// Raw document store keyed by short names such as `"identity"`.
pub trait Storage: Send + Sync {
    /// Read the raw document stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the backend cannot be read.
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace the document stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the backend cannot be written.
    fn write(&self, key: &str, raw: &str) -> Result<(), StorageError>;

    /// Remove the document stored under `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the backend cannot be modified.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Load and decode a JSON document stored under `key`.
///
/// # Errors
///
/// Returns [`StorageError::Json`] for documents that do not decode as `T`.
pub fn load_json<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> Result<Option<T>, StorageError> {
    let Some(raw) = storage.read(key)? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| StorageError::Json { key: key.to_owned(), source })
}

/// Encode `value` as JSON and store it under `key`.
///
/// # Errors
///
/// Returns [`StorageError`] if encoding or the backend write fails.
pub fn save_json<T: Serialize>(storage: &dyn Storage, key: &str, value: &T) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value).map_err(|source| StorageError::Json { key: key.to_owned(), source })?;
    storage.write(key, &raw)
}

// =============================================================================
// MEMORY
// =============================================================================

/// In-process storage. Cloning is not supported; share it through an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    docs: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.docs).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.docs).is_empty()
    }
}

impl Storage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(lock(&self.docs).get(key).cloned())
    }

    fn write(&self, key: &str, raw: &str) -> Result<(), StorageError> {
        lock(&self.docs).insert(key.to_owned(), raw.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.docs).remove(key);
        Ok(())
    }
}

// =============================================================================
// FILE
// =============================================================================

/// One JSON file per key inside `dir`. The directory is created on first write.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_owned()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl Storage for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io { key: key.to_owned(), source }),
        }
    }

    fn write(&self, key: &str, raw: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let io_err = |source: std::io::Error| StorageError::Io { key: key.to_owned(), source };
        std::fs::create_dir_all(&self.dir).map_err(io_err)?;
        // Unique temp name so concurrent writers never share a half-written file.
        let tmp = self.dir.join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4()));
        std::fs::write(&tmp, raw).map_err(io_err)?;
        std::fs::rename(&tmp, &path).map_err(io_err)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { key: key.to_owned(), source }),
        }
    }
}
