use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use tutor_core::Clock;

use crate::blob::{BlobStore, InMemoryBlobStore};
use crate::repository::{InMemoryStructuredStore, StorageError, StoreName, StoredRecord, StructuredStore};

/// Blob key holding the backup copy of a record.
#[must_use]
pub fn backup_key(store: StoreName, key: Option<&str>) -> String {
    match key {
        Some(key) => format!("backup_{store}_{key}"),
        None => format!("backup_{store}"),
    }
}

/// File name used by [`LocalDatabase::backup_to_file`].
#[must_use]
pub fn backup_file_name(date: NaiveDate) -> String {
    format!("tutor-backup-{}.json", date.format("%Y-%m-%d"))
}

/// Local persistence writing every record to a structured store and, as a
/// backup, to a flat blob store.
///
/// Reads prefer the structured store and fall back to the blob. The two
/// copies are never reconciled.
#[derive(Clone)]
pub struct LocalDatabase {
    structured: Arc<dyn StructuredStore>,
    blob: Arc<dyn BlobStore>,
    clock: Clock,
}

impl LocalDatabase {
    #[must_use]
    pub fn new(structured: Arc<dyn StructuredStore>, blob: Arc<dyn BlobStore>, clock: Clock) -> Self {
        Self {
            structured,
            blob,
            clock,
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryStructuredStore::new()),
            Arc::new(InMemoryBlobStore::new()),
            Clock::default(),
        )
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Saves `data` under `key`, or under a generated key when `key` is `None`.
    ///
    /// The blob backup is written whatever happens to the structured write.
    /// Returns the key used.
    ///
    /// # Errors
    ///
    /// Fails only when both writes fail, returning the structured error.
    pub async fn save<T: Serialize + ?Sized>(
        &self,
        store: StoreName,
        key: Option<&str>,
        data: &T,
    ) -> Result<String, StorageError> {
        let value = serde_json::to_value(data)?;
        let record_key = key.map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_owned);
        let record = StoredRecord::new(store, record_key.clone(), value, self.clock.now());

        let structured = self.structured.put(&record).await;
        if let Err(err) = &structured {
            warn!(store = %store, key = %record_key, error = %err, "structured write failed, keeping blob backup");
        }

        let backup = self.write_backup(&backup_key(store, key), &record.data);
        match (structured, backup) {
            (Err(err), Err(blob_err)) => {
                warn!(store = %store, error = %blob_err, "blob backup failed too");
                Err(err)
            }
            (Ok(()), Err(blob_err)) => {
                warn!(store = %store, error = %blob_err, "blob backup failed");
                Ok(record_key)
            }
            _ => Ok(record_key),
        }
    }

    fn write_backup(&self, key: &str, data: &Value) -> Result<(), StorageError> {
        let text = serde_json::to_string(data)?;
        self.blob.set(key, &text)
    }

    fn read_backup(&self, key: &str) -> Option<Value> {
        match self.blob.get(key) {
            Ok(Some(text)) => match serde_json::from_str(&text) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(key, error = %err, "unreadable blob backup");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key, error = %err, "blob read failed");
                None
            }
        }
    }

    /// Loads one record, falling back to its blob backup on a miss or failure.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when the stored document does not match `T`.
    pub async fn load<T: DeserializeOwned>(
        &self,
        store: StoreName,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        let value = match self.structured.get(store, key).await {
            Ok(record) => Some(record.data),
            Err(StorageError::NotFound) => {
                debug!(store = %store, key, "structured miss, trying blob backup");
                self.read_backup(&backup_key(store, Some(key)))
            }
            Err(err) => {
                warn!(store = %store, key, error = %err, "structured read failed, trying blob backup");
                self.read_backup(&backup_key(store, Some(key)))
            }
        };
        value.map(serde_json::from_value).transpose().map_err(Into::into)
    }

    /// Every document of a store. Falls back to the keyless blob backup when
    /// the structured read fails.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when a document does not match `T`.
    pub async fn load_all<T: DeserializeOwned>(&self, store: StoreName) -> Result<Vec<T>, StorageError> {
        let values = match self.structured.get_all(store).await {
            Ok(records) => records.into_iter().map(|r| r.data).collect(),
            Err(err) => {
                warn!(store = %store, error = %err, "structured scan failed, trying blob backup");
                self.read_backup(&backup_key(store, None))
                    .map(flatten)
                    .unwrap_or_default()
            }
        };
        decode_all(values)
    }

    /// Documents of a store owned by `user_id`. Stores without a user index
    /// always yield nothing.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when a document does not match `T`.
    pub async fn load_by_user<T: DeserializeOwned>(
        &self,
        store: StoreName,
        user_id: &str,
    ) -> Result<Vec<T>, StorageError> {
        if !store.is_user_indexed() {
            return Ok(Vec::new());
        }
        let values = match self.structured.get_by_user(store, user_id).await {
            Ok(records) => records.into_iter().map(|r| r.data).collect(),
            Err(err) => {
                warn!(store = %store, user_id, error = %err, "user scan failed, trying blob backup");
                self.read_backup(&backup_key(store, Some(user_id)))
                    .map(flatten)
                    .unwrap_or_default()
            }
        };
        decode_all(values)
    }

    /// Deletes a record. The blob backup is removed even if the structured
    /// delete fails.
    ///
    /// # Errors
    ///
    /// Returns the structured store's error.
    pub async fn delete(&self, store: StoreName, key: &str) -> Result<(), StorageError> {
        let result = self.structured.delete(store, key).await;
        if let Err(err) = self.blob.remove(&backup_key(store, Some(key))) {
            warn!(store = %store, key, error = %err, "blob backup removal failed");
        }
        if let Err(err) = &result {
            warn!(store = %store, key, error = %err, "structured delete failed");
        }
        result
    }

    /// Every store's documents as one JSON object keyed by store name.
    ///
    /// A store that cannot be read is left out.
    pub async fn export_data(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for store in StoreName::ALL {
            match self.load_all::<Value>(store).await {
                Ok(values) => {
                    out.insert(store.as_str().to_owned(), Value::Array(values));
                }
                Err(err) => warn!(store = %store, error = %err, "export skipped store"),
            }
        }
        out
    }

    /// Saves the documents of every known store in `data`; unknown stores
    /// are skipped. Array entries are saved one by one, keyed by their `id`
    /// when they have one. Returns the number of documents saved.
    pub async fn import_data(&self, data: &Map<String, Value>) -> usize {
        let mut saved = 0;
        for (name, content) in data {
            let Ok(store) = name.parse::<StoreName>() else {
                debug!(store = %name, "import skipped unknown store");
                continue;
            };
            for item in flatten(content.clone()) {
                let key = document_id(&item);
                match self.save(store, key.as_deref(), &item).await {
                    Ok(_) => saved += 1,
                    Err(err) => warn!(store = %store, error = %err, "import failed for document"),
                }
            }
        }
        saved
    }

    /// Writes [`LocalDatabase::export_data`] as pretty JSON to
    /// `dir/tutor-backup-YYYY-MM-DD.json` and returns the path.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Serialization` if the file cannot be written.
    pub async fn backup_to_file(&self, dir: &Path, date: NaiveDate) -> Result<PathBuf, StorageError> {
        let data = self.export_data().await;
        let text = serde_json::to_string_pretty(&Value::Object(data))?;
        let path = dir.join(backup_file_name(date));
        std::fs::write(&path, text)?;
        Ok(path)
    }

    /// Reads a backup file and imports it.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read and `Serialization` if it is
    /// not a JSON object.
    pub async fn restore_from_file(&self, path: &Path) -> Result<usize, StorageError> {
        let text = std::fs::read_to_string(path)?;
        let Value::Object(data) = serde_json::from_str::<Value>(&text)? else {
            return Err(StorageError::Serialization(
                "backup file must hold a JSON object".into(),
            ));
        };
        Ok(self.import_data(&data).await)
    }
}

fn flatten(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn document_id(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn decode_all<T: DeserializeOwned>(values: Vec<Value>) -> Result<Vec<T>, StorageError> {
    values
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(StorageError::from))
        .collect()
}
