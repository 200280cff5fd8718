//! `SQLite` implementation of [`SettingsStore`].
//!
//! Each setting is one row holding its JSON document as text.

use std::future::Future;

use serde_json::Value;
use sqlx::SqlitePool;

use hubrelay_app::ports::SettingsStore;
use hubrelay_domain::error::BridgeError;
use hubrelay_domain::time::{now, to_iso_millis};

use crate::error::StorageError;

const SELECT_BY_KEY: &str = "SELECT value FROM settings WHERE key = ?";
const UPSERT: &str = "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?) \
     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";

/// `SQLite`-backed settings store.
#[derive(Clone)]
pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl SettingsStore for SqliteSettingsStore {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>, BridgeError>> + Send {
        let pool = self.pool.clone();
        let key = key.to_string();
        async move {
            let row: Option<(String,)> = sqlx::query_as(SELECT_BY_KEY)
                .bind(&key)
                .fetch_optional(&pool)
                .await
                .map_err(StorageError::from)?;

            let Some((raw,)) = row else {
                return Ok(None);
            };
            let value = serde_json::from_str(&raw)
                .map_err(|source| StorageError::Json { key, source })?;
            Ok(Some(value))
        }
    }

    fn set(&self, key: &str, value: Value) -> impl Future<Output = Result<(), BridgeError>> + Send {
        let pool = self.pool.clone();
        let key = key.to_string();
        async move {
            let raw = serde_json::to_string(&value).map_err(|source| StorageError::Json {
                key: key.clone(),
                source,
            })?;
            sqlx::query(UPSERT)
                .bind(&key)
                .bind(raw)
                .bind(to_iso_millis(&now()))
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;
            Ok(())
        }
    }
}
