use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use super::SqliteStore;
use crate::repository::{KeyValueStore, StorageError, entry_size};

fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn size_i64(v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization("size_bytes overflow".into()))
}

fn size_u64(v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid size_bytes: {v}")))
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT value FROM kv_entries WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.map(|r| r.try_get::<String, _>("value").map_err(ser))
            .transpose()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let size = entry_size(key, value);
        let mut tx = self.pool.begin().await.map_err(conn)?;

        if let Some(quota) = self.quota {
            let used: i64 = sqlx::query(
                "SELECT COALESCE(SUM(size_bytes), 0) AS used FROM kv_entries WHERE key <> ?1",
            )
            .bind(key)
            .fetch_one(&mut *tx)
            .await
            .map_err(conn)?
            .try_get("used")
            .map_err(ser)?;

            let available = quota.saturating_sub(size_u64(used)?);
            if size > available {
                return Err(StorageError::QuotaExceeded {
                    requested: size,
                    available,
                });
            }
        }

        sqlx::query(
            r"
                INSERT INTO kv_entries (key, value, size_bytes, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    size_bytes = excluded.size_bytes,
                    updated_at = excluded.updated_at
            ",
        )
        .bind(key)
        .bind(value)
        .bind(size_i64(size)?)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv_entries WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT key FROM kv_entries ORDER BY key ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("key").map_err(ser))
            .collect()
    }

    fn quota_bytes(&self) -> Option<u64> {
        self.quota
    }

    async fn used_bytes(&self) -> Result<u64, StorageError> {
        let used: i64 = sqlx::query("SELECT COALESCE(SUM(size_bytes), 0) AS used FROM kv_entries")
            .fetch_one(&self.pool)
            .await
            .map_err(conn)?
            .try_get("used")
            .map_err(ser)?;
        size_u64(used)
    }
}
