use async_trait::async_trait;

use crate::repository::{StorageError, StoreName, StoredRecord, StructuredStore};

use super::SqliteRepository;
use super::mapping::{conn, map_record_row, ser};

#[async_trait]
impl StructuredStore for SqliteRepository {
    async fn put(&self, record: &StoredRecord) -> Result<(), StorageError> {
        let data = serde_json::to_string(&record.data).map_err(ser)?;

        sqlx::query(
            r"
            INSERT INTO records (store, key, user_id, data, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(store, key) DO UPDATE SET
                user_id = excluded.user_id,
                data = excluded.data,
                updated_at = excluded.updated_at
            ",
        )
        .bind(record.store.as_str())
        .bind(&record.key)
        .bind(record.user_id.as_deref())
        .bind(data)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn get(&self, store: StoreName, key: &str) -> Result<StoredRecord, StorageError> {
        let row = sqlx::query(
            r"
            SELECT store, key, user_id, data, updated_at
            FROM records
            WHERE store = ?1 AND key = ?2
            ",
        )
        .bind(store.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        match row {
            Some(row) => map_record_row(&row),
            None => Err(StorageError::NotFound),
        }
    }

    async fn get_all(&self, store: StoreName) -> Result<Vec<StoredRecord>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT store, key, user_id, data, updated_at
            FROM records
            WHERE store = ?1
            ORDER BY key ASC
            ",
        )
        .bind(store.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_record_row).collect()
    }

    async fn get_by_user(
        &self,
        store: StoreName,
        user_id: &str,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT store, key, user_id, data, updated_at
            FROM records
            WHERE store = ?1 AND user_id = ?2
            ORDER BY key ASC
            ",
        )
        .bind(store.as_str())
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_record_row).collect()
    }

    async fn delete(&self, store: StoreName, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM records WHERE store = ?1 AND key = ?2")
            .bind(store.as_str())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(())
    }
}
