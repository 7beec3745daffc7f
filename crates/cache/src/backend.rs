//! Cache backend contract.

use async_trait::async_trait;
use std::time::Duration;

/// Error type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors raised by cache backends. The cache layer logs these and never
/// passes them on.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backend could not be reached
    #[error("Cache connection failed: {0}")]
    Connection(String),

    /// An operation failed on a reachable backend
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// A cached value could not be encoded or decoded
    #[error("Cache serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Key/value store with per-key TTL.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Establish the connection. Called at most once per availability cycle.
    async fn connect(&self) -> Result<()>;

    /// Fetch one key.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Fetch many keys in a single round trip. Output is parallel to `keys`.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Store one key.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Store many keys with the same TTL.
    async fn set_many(&self, entries: &[(String, String)], ttl: Duration) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value, ttl).await?;
        }
        Ok(())
    }

    /// Remove one key.
    async fn delete(&self, key: &str) -> Result<()>;
}
