//! Three-domain cache with a process-lifetime availability latch.
//!
//! Domains and key schemes:
//!
//! | domain        | key                          | default TTL |
//! |---------------|------------------------------|-------------|
//! | embeddings    | `emb:{model}:{content_hash}` | 7 days      |
//! | query results | `qry:{namespace}:{gen}:{hash}` | 1 hour    |
//! | chunk text    | `chunk:{id}:{text_hash}`     | 24 hours    |
//!
//! Query results are scoped by a per-namespace generation (`gen:{namespace}`)
//! that ingestion bumps after every write, so results cached before a
//! write are never read after it.
//!
//! The first call attempts one connection. If it fails the layer latches
//! unavailable and every later call is a no-op until [`CacheLayer::reset`].
//! Reads on an unavailable cache are misses; writes never raise.

use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tenantrag_core::{content_hash, CacheConfig, MetadataFilter, SearchMatch};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::CacheBackend;
use crate::memory::MemoryCacheBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Availability {
    Unknown,
    Available,
    Unavailable,
}

/// Per-domain TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    /// Embedding vectors
    pub embeddings: Duration,

    /// Per-namespace query results
    pub query_results: Duration,

    /// Chunk text
    pub chunk_text: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CacheTtls {
    fn from(config: &CacheConfig) -> Self {
        Self {
            embeddings: Duration::from_secs(config.embedding_ttl_secs),
            query_results: Duration::from_secs(config.query_ttl_secs),
            chunk_text: Duration::from_secs(config.chunk_ttl_secs),
        }
    }
}

/// Embedding cache key.
pub fn embedding_key(model: &str, content_hash: &str) -> String {
    format!("emb:{model}:{content_hash}")
}

/// Query result cache key.
pub fn query_key(namespace: &str, generation: &str, query_hash: &str) -> String {
    format!("qry:{namespace}:{generation}:{query_hash}")
}

/// Namespace generation key.
pub fn generation_key(namespace: &str) -> String {
    format!("gen:{namespace}")
}

/// Chunk text cache key.
pub fn chunk_key(reference: &str) -> String {
    format!("chunk:{reference}")
}

/// Hash identifying a namespace query: text, applied filter and depth.
pub fn query_fingerprint(text: &str, filter: Option<&MetadataFilter>, top_k: usize) -> String {
    let filter = filter
        .filter(|f| !f.is_empty())
        .map(|f| f.to_wire().to_string())
        .unwrap_or_default();
    content_hash(&format!("{text}\u{1f}{filter}\u{1f}{top_k}"))
}

/// Cache facade used by the embedding service, the orchestrator and
/// context assembly.
pub struct CacheLayer {
    backend: Option<Arc<dyn CacheBackend>>,
    ttls: CacheTtls,
    state: Mutex<Availability>,
}

impl CacheLayer {
    /// Cache over `backend`.
    pub fn new(backend: Arc<dyn CacheBackend>, ttls: CacheTtls) -> Self {
        Self {
            backend: Some(backend),
            ttls,
            state: Mutex::new(Availability::Unknown),
        }
    }

    /// Process-local cache with default TTLs.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()), CacheTtls::default())
    }

    /// Pass-through cache. Every read misses, every write is dropped.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            ttls: CacheTtls::default(),
            state: Mutex::new(Availability::Unavailable),
        }
    }

    /// Configured TTLs.
    pub fn ttls(&self) -> CacheTtls {
        self.ttls
    }

    /// Clear the availability latch so the next call reconnects.
    pub async fn reset(&self) {
        if self.backend.is_some() {
            *self.state.lock().await = Availability::Unknown;
        }
    }

    /// Whether the backend is usable. Triggers the connection attempt if
    /// none was made yet.
    pub async fn is_available(&self) -> bool {
        self.backend().await.is_some()
    }

    async fn backend(&self) -> Option<&Arc<dyn CacheBackend>> {
        let backend = self.backend.as_ref()?;
        // The lock is held across the attempt so concurrent callers wait
        // for its outcome instead of connecting again.
        let mut state = self.state.lock().await;
        match *state {
            Availability::Available => Some(backend),
            Availability::Unavailable => None,
            Availability::Unknown => match backend.connect().await {
                Ok(()) => {
                    *state = Availability::Available;
                    debug!("Cache available");
                    Some(backend)
                }
                Err(e) => {
                    *state = Availability::Unavailable;
                    warn!(error = %e, "Cache unavailable, continuing without cache");
                    None
                }
            },
        }
    }

    async fn get_json_many<T: DeserializeOwned>(&self, keys: &[String]) -> Vec<Option<T>> {
        let Some(backend) = self.backend().await else {
            return keys.iter().map(|_| None).collect();
        };
        match backend.get_many(keys).await {
            Ok(values) => values
                .into_iter()
                .map(|v| v.and_then(|raw| serde_json::from_str(&raw).ok()))
                .collect(),
            Err(e) => {
                warn!(error = %e, count = keys.len(), "Cache read failed");
                keys.iter().map(|_| None).collect()
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let backend = self.backend().await?;
        match backend.get(key).await {
            Ok(value) => value.and_then(|raw| serde_json::from_str(&raw).ok()),
            Err(e) => {
                warn!(error = %e, key, "Cache read failed");
                None
            }
        }
    }

    async fn put_json_many<T: Serialize>(&self, entries: Vec<(String, T)>, ttl: Duration) {
        if entries.is_empty() {
            return;
        }
        let Some(backend) = self.backend().await else {
            return;
        };
        let encoded: Vec<(String, String)> = entries
            .into_iter()
            .filter_map(|(key, value)| serde_json::to_string(&value).ok().map(|v| (key, v)))
            .collect();
        if let Err(e) = backend.set_many(&encoded, ttl).await {
            warn!(error = %e, count = encoded.len(), "Cache write failed");
        }
    }

    // === Embeddings ===

    /// Cached embeddings for `hashes`, parallel to the input.
    pub async fn get_embeddings(&self, model: &str, hashes: &[String]) -> Vec<Option<Vec<f32>>> {
        let keys: Vec<String> = hashes.iter().map(|h| embedding_key(model, h)).collect();
        self.get_json_many(&keys).await
    }

    /// Store embeddings keyed by content hash.
    pub async fn put_embeddings(&self, model: &str, entries: &[(String, Vec<f32>)]) {
        let entries: Vec<(String, &Vec<f32>)> = entries
            .iter()
            .map(|(hash, vector)| (embedding_key(model, hash), vector))
            .collect();
        self.put_json_many(entries, self.ttls.embeddings).await;
    }

    // === Query results ===

    /// Cached raw results of one namespace query at its current generation.
    pub async fn get_query_results(&self, namespace: &str, query_hash: &str) -> Option<Vec<SearchMatch>> {
        let generation = self.generation(namespace).await;
        self.get_json(&query_key(namespace, &generation, query_hash)).await
    }

    /// Store raw results of one namespace query at its current generation.
    pub async fn put_query_results(&self, namespace: &str, query_hash: &str, matches: &[SearchMatch]) {
        let generation = self.generation(namespace).await;
        self.put_json_many(
            vec![(query_key(namespace, &generation, query_hash), matches)],
            self.ttls.query_results,
        )
        .await;
    }

    /// Start a new generation for `namespace`. Query results cached before
    /// the call are no longer read.
    pub async fn invalidate_namespace(&self, namespace: &str) {
        let generation = chrono::Utc::now().timestamp_micros().to_string();
        debug!(namespace, %generation, "Query cache generation bumped");
        self.put_json_many(vec![(generation_key(namespace), generation)], self.ttls.query_results)
            .await;
    }

    async fn generation(&self, namespace: &str) -> String {
        self.get_json::<String>(&generation_key(namespace))
            .await
            .unwrap_or_else(|| "0".to_string())
    }

    // === Chunk text ===

    /// Cached chunk texts, parallel to `references`.
    pub async fn get_chunk_texts(&self, references: &[String]) -> Vec<Option<String>> {
        let keys: Vec<String> = references.iter().map(|r| chunk_key(r)).collect();
        self.get_json_many(&keys).await
    }

    /// Store chunk texts by reference.
    pub async fn put_chunk_texts(&self, entries: &[(String, String)]) {
        let entries: Vec<(String, &String)> = entries
            .iter()
            .map(|(reference, text)| (chunk_key(reference), text))
            .collect();
        self.put_json_many(entries, self.ttls.chunk_text).await;
    }
}
