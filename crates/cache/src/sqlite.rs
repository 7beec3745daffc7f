//! SQLite-backed TTL cache shared between processes on one host.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::backend::{CacheBackend, CacheError, Result};

/// Keys bound per `IN (...)` query, below SQLite's parameter limit.
const KEYS_PER_QUERY: usize = 500;

fn backend_err(e: sqlx::Error) -> CacheError {
    CacheError::Backend(e.to_string())
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// SQLite cache backend. The pool is opened by [`CacheBackend::connect`].
pub struct SqliteCacheBackend {
    url: String,
    pool: OnceCell<SqlitePool>,
}

impl SqliteCacheBackend {
    /// Backend for `url`, not yet connected.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool: OnceCell::new(),
        }
    }

    fn pool(&self) -> Result<&SqlitePool> {
        self.pool
            .get()
            .ok_or_else(|| CacheError::Connection("cache backend is not connected".to_string()))
    }

    /// Delete expired rows. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(now_millis())
            .execute(self.pool()?)
            .await
            .map_err(backend_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CacheBackend for SqliteCacheBackend {
    async fn connect(&self) -> Result<()> {
        self.pool
            .get_or_try_init(|| async {
                let pool = SqlitePoolOptions::new()
                    .max_connections(4)
                    .acquire_timeout(Duration::from_secs(2))
                    .connect(&self.url)
                    .await
                    .map_err(|e| CacheError::Connection(e.to_string()))?;

                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS cache_entries (
                        key TEXT PRIMARY KEY,
                        value TEXT NOT NULL,
                        expires_at INTEGER NOT NULL
                    )",
                )
                .execute(&pool)
                .await
                .map_err(|e| CacheError::Connection(e.to_string()))?;

                debug!(url = %self.url, "Cache backend connected");
                Ok::<_, CacheError>(pool)
            })
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM cache_entries WHERE key = ? AND expires_at > ?")
            .bind(key)
            .bind(now_millis())
            .fetch_optional(self.pool()?)
            .await
            .map_err(backend_err)?;
        row.map(|r| r.try_get::<String, _>("value").map_err(backend_err))
            .transpose()
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let pool = self.pool()?;
        let now = now_millis();
        let mut found: HashMap<String, String> = HashMap::with_capacity(keys.len());

        for group in keys.chunks(KEYS_PER_QUERY) {
            let placeholders = vec!["?"; group.len()].join(", ");
            let sql = format!(
                "SELECT key, value FROM cache_entries WHERE expires_at > ? AND key IN ({placeholders})"
            );
            let mut query = sqlx::query(&sql).bind(now);
            for key in group {
                query = query.bind(key);
            }
            for row in query.fetch_all(pool).await.map_err(backend_err)? {
                let key: String = row.try_get("key").map_err(backend_err)?;
                let value: String = row.try_get("value").map_err(backend_err)?;
                found.insert(key, value);
            }
        }

        Ok(keys.iter().map(|k| found.get(k).cloned()).collect())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        sqlx::query(
            "INSERT INTO cache_entries (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(now_millis() + ttl.as_millis() as i64)
        .execute(self.pool()?)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, String)], ttl: Duration) -> Result<()> {
        let pool = self.pool()?;
        let expires_at = now_millis() + ttl.as_millis() as i64;
        let mut tx = pool.begin().await.map_err(backend_err)?;
        for (key, value) in entries {
            sqlx::query(
                "INSERT INTO cache_entries (key, value, expires_at) VALUES (?, ?, ?)
                ON CONFLICT (key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            )
            .bind(key)
            .bind(value)
            .bind(expires_at)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        }
        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(self.pool()?)
            .await
            .map_err(backend_err)?;
        Ok(())
    }
}
