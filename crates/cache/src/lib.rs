//! TTL caching for embeddings, query results and chunk text.
//!
//! Cache absence or eviction never changes results, only latency. A
//! backend that cannot be reached is tried once and then bypassed.

#![warn(missing_docs)]

pub mod backend;
pub mod layer;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use backend::{CacheBackend, CacheError, Result};
pub use layer::{chunk_key, embedding_key, generation_key, query_fingerprint, query_key, CacheLayer, CacheTtls};
pub use memory::MemoryCacheBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCacheBackend;
