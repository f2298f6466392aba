use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::repository::StorageError;

/// Flat string key/value storage with synchronous access.
pub trait BlobStore: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the value cannot be persisted.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the removal cannot be persisted.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

fn lock_err<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[derive(Clone, Default)]
pub struct InMemoryBlobStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl InMemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().map_err(lock_err)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .map_err(lock_err)?
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().map_err(lock_err)?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.lock().map_err(lock_err)?.keys().cloned().collect())
    }
}

/// Blob store kept in a single JSON object file.
///
/// The file is read once on open and rewritten after every mutation.
pub struct FileBlobStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileBlobStore {
    /// Opens the file at `path`, starting empty when it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `Io` when the file exists but cannot be read and
    /// `Serialization` when it is not a JSON object of strings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let text = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl BlobStore for FileBlobStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().map_err(lock_err)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self.entries.lock().map_err(lock_err)?;
        let previous = guard.insert(key.to_owned(), value.to_owned());
        if let Err(err) = self.flush(&guard) {
            match previous {
                Some(old) => guard.insert(key.to_owned(), old),
                None => guard.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self.entries.lock().map_err(lock_err)?;
        if let Some(old) = guard.remove(key)
            && let Err(err) = self.flush(&guard)
        {
            guard.insert(key.to_owned(), old);
            return Err(err);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.lock().map_err(lock_err)?.keys().cloned().collect())
    }
}
