use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::repository::{StorageError, StoreName, StoredRecord};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn map_record_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredRecord, StorageError> {
    let store: String = row.try_get("store").map_err(ser)?;
    let data: String = row.try_get("data").map_err(ser)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(ser)?;

    Ok(StoredRecord {
        store: store.parse::<StoreName>()?,
        key: row.try_get("key").map_err(ser)?,
        user_id: row.try_get("user_id").map_err(ser)?,
        data: serde_json::from_str(&data).map_err(ser)?,
        updated_at,
    })
}
