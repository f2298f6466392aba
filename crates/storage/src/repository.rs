use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

//
// ─── STORE NAMES ───────────────────────────────────────────────────────────────
//

/// One object store per resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreName {
    Users,
    Students,
    Words,
    WordSets,
    Schedules,
    LearningProgress,
    Settings,
    CurrentUser,
}

impl StoreName {
    pub const ALL: [StoreName; 8] = [
        StoreName::Users,
        StoreName::Students,
        StoreName::Words,
        StoreName::WordSets,
        StoreName::Schedules,
        StoreName::LearningProgress,
        StoreName::Settings,
        StoreName::CurrentUser,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StoreName::Users => "users",
            StoreName::Students => "students",
            StoreName::Words => "words",
            StoreName::WordSets => "wordSets",
            StoreName::Schedules => "schedules",
            StoreName::LearningProgress => "learningProgress",
            StoreName::Settings => "settings",
            StoreName::CurrentUser => "currentUser",
        }
    }

    /// Whether records of this store are looked up by owning user.
    #[must_use]
    pub fn is_user_indexed(self) -> bool {
        !matches!(self, StoreName::Users | StoreName::Words)
    }
}

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreName {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StoreName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| StorageError::Serialization(format!("unknown store: {s}")))
    }
}

//
// ─── RECORDS ───────────────────────────────────────────────────────────────────
//

/// One keyed JSON document inside a store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub store: StoreName,
    pub key: String,
    pub user_id: Option<String>,
    pub data: Value,
    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    /// Builds a record, reading the owning user from `userId` or `user_id`
    /// in the document for user-indexed stores.
    #[must_use]
    pub fn new(store: StoreName, key: impl Into<String>, data: Value, at: DateTime<Utc>) -> Self {
        let user_id = if store.is_user_indexed() {
            owner_of(&data)
        } else {
            None
        };
        Self {
            store,
            key: key.into(),
            user_id,
            data,
            updated_at: at,
        }
    }
}

fn owner_of(data: &Value) -> Option<String> {
    let raw = data.get("userId").or_else(|| data.get("user_id"))?;
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Indexed, keyed document storage.
#[async_trait]
pub trait StructuredStore: Send + Sync {
    /// Insert or replace a record by `(store, key)`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be stored.
    async fn put(&self, record: &StoredRecord) -> Result<(), StorageError>;

    /// Fetch one record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get(&self, store: StoreName, key: &str) -> Result<StoredRecord, StorageError>;

    /// Every record of a store, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on read failures.
    async fn get_all(&self, store: StoreName) -> Result<Vec<StoredRecord>, StorageError>;

    /// Records of a store owned by `user_id`, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on read failures.
    async fn get_by_user(
        &self,
        store: StoreName,
        user_id: &str,
    ) -> Result<Vec<StoredRecord>, StorageError>;

    /// Remove a record. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the delete cannot be executed.
    async fn delete(&self, store: StoreName, key: &str) -> Result<(), StorageError>;
}

/// Simple in-memory structured store for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryStructuredStore {
    records: Arc<Mutex<BTreeMap<(StoreName, String), StoredRecord>>>,
}

impl InMemoryStructuredStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StructuredStore for InMemoryStructuredStore {
    async fn put(&self, record: &StoredRecord) -> Result<(), StorageError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert((record.store, record.key.clone()), record.clone());
        Ok(())
    }

    async fn get(&self, store: StoreName, key: &str) -> Result<StoredRecord, StorageError> {
        let guard = self
            .records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard
            .get(&(store, key.to_owned()))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn get_all(&self, store: StoreName) -> Result<Vec<StoredRecord>, StorageError> {
        let guard = self
            .records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .values()
            .filter(|r| r.store == store)
            .cloned()
            .collect())
    }

    async fn get_by_user(
        &self,
        store: StoreName,
        user_id: &str,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        let guard = self
            .records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .values()
            .filter(|r| r.store == store && r.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect())
    }

    async fn delete(&self, store: StoreName, key: &str) -> Result<(), StorageError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(&(store, key.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tutor_core::time::fixed_now;

    #[test]
    fn store_names_round_trip_through_str() {
        for name in StoreName::ALL {
            assert_eq!(name.as_str().parse::<StoreName>().unwrap(), name);
        }
        assert!("nope".parse::<StoreName>().is_err());
    }

    #[test]
    fn only_indexed_stores_carry_owner() {
        let data = json!({"userId": "teacher-1", "x": 1});
        let indexed = StoredRecord::new(StoreName::Schedules, "a", data.clone(), fixed_now());
        let plain = StoredRecord::new(StoreName::Words, "a", data, fixed_now());
        assert_eq!(indexed.user_id.as_deref(), Some("teacher-1"));
        assert_eq!(plain.user_id, None);
    }

    #[tokio::test]
    async fn in_memory_filters_by_store_and_user() {
        let repo = InMemoryStructuredStore::new();
        let at = fixed_now();
        repo.put(&StoredRecord::new(StoreName::Students, "1", json!({"user_id": 7}), at))
            .await
            .unwrap();
        repo.put(&StoredRecord::new(StoreName::Students, "2", json!({"user_id": 8}), at))
            .await
            .unwrap();
        repo.put(&StoredRecord::new(StoreName::Settings, "1", json!({"user_id": 7}), at))
            .await
            .unwrap();

        assert_eq!(repo.get_all(StoreName::Students).await.unwrap().len(), 2);
        let mine = repo.get_by_user(StoreName::Students, "7").await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].key, "1");

        repo.delete(StoreName::Students, "1").await.unwrap();
        assert!(matches!(
            repo.get(StoreName::Students, "1").await,
            Err(StorageError::NotFound)
        ));
        repo.delete(StoreName::Students, "1").await.unwrap();
    }
}
