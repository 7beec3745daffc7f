//! Application configuration.
//!
//! Values merge in order: built-in defaults, an optional TOML file, then
//! `TENANTRAG_` environment variables (`__` separates nested keys, e.g.
//! `TENANTRAG_RETRIEVAL__TOP_K=8`). API keys are never read from the file;
//! configs only name the environment variable that holds them.

use crate::error::{RagError, Result};
use crate::namespace::NamespacePrefixes;
use crate::retry::RetryConfig;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Embedding provider settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Rerank provider settings
    #[serde(default)]
    pub rerank: RerankConfig,

    /// Cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Ingestion settings
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Query settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Provider retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Vector store settings
    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    /// Checkpoint and audit store settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Namespace naming
    #[serde(default)]
    pub namespaces: NamespacePrefixes,
}

impl AppConfig {
    /// Environment variable prefix.
    pub const ENV_PREFIX: &'static str = "TENANTRAG_";

    /// Layered figment for `path`. A missing file is skipped.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(Self::ENV_PREFIX).split("__"))
    }

    /// Load and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: AppConfig = Self::figment(path)
            .extract()
            .map_err(|e| RagError::config(format!("failed to load configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot work at runtime.
    pub fn validate(&self) -> Result<()> {
        let i = &self.ingestion;
        if i.chunk_overlap >= i.chunk_size {
            return Err(RagError::config("ingestion.chunk_overlap must be smaller than chunk_size"));
        }
        if i.child_overlap >= i.child_size || i.child_size > i.parent_size {
            return Err(RagError::config(
                "ingestion child windows must be smaller than the parent window and larger than their overlap",
            ));
        }
        if i.batch_min == 0 || i.batch_min > i.batch_max {
            return Err(RagError::config("ingestion.batch_min must be in 1..=batch_max"));
        }
        if i.fast_batch_ms >= i.slow_batch_ms {
            return Err(RagError::config("ingestion.fast_batch_ms must be below slow_batch_ms"));
        }
        if !(0.0..=1.0).contains(&self.retrieval.hybrid_alpha) {
            return Err(RagError::config("retrieval.hybrid_alpha must be within [0, 1]"));
        }
        if self.embedding.max_batch_size == 0 {
            return Err(RagError::config("embedding.max_batch_size must be positive"));
        }
        Ok(())
    }
}

/// Read an API key from the environment variable named by `var`.
pub fn api_key_from_env(var: &str) -> Result<String> {
    std::env::var(var).map_err(|_| RagError::config(format!("environment variable {var} is not set")))
}

/// Dense embedding provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name, also part of the embedding cache key
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector dimension
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// API base url
    #[serde(default = "default_embedding_url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,

    /// Maximum texts per provider request
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Requests admitted per rolling minute
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,

    /// Estimated tokens admitted per rolling minute
    #[serde(default = "default_tpm")]
    pub tokens_per_minute: u64,

    /// Longest a caller waits for rate-limit budget
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    /// Price in USD per 1000 tokens, used for cost estimates
    #[serde(default = "default_price_per_1k")]
    pub price_per_1k_tokens: f64,

    /// Number of most frequent terms kept in sparse vectors
    #[serde(default = "default_sparse_top_n")]
    pub sparse_top_n: usize,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimension() -> usize {
    1536
}

fn default_embedding_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_batch_size() -> usize {
    2048
}

fn default_rpm() -> u32 {
    3000
}

fn default_tpm() -> u64 {
    1_000_000
}

fn default_max_wait_secs() -> u64 {
    60
}

fn default_price_per_1k() -> f64 {
    0.00013
}

fn default_sparse_top_n() -> usize {
    100
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_dimension(),
            base_url: default_embedding_url(),
            api_key_env: default_embedding_key_env(),
            max_batch_size: default_max_batch_size(),
            requests_per_minute: default_rpm(),
            tokens_per_minute: default_tpm(),
            max_wait_secs: default_max_wait_secs(),
            price_per_1k_tokens: default_price_per_1k(),
            sparse_top_n: default_sparse_top_n(),
        }
    }
}

impl EmbeddingConfig {
    /// Rate-limit wait bound.
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

/// Cross-encoder rerank provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankConfig {
    /// Whether reranking runs at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Model name
    #[serde(default = "default_rerank_model")]
    pub model: String,

    /// API base url
    #[serde(default = "default_rerank_url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_rerank_key_env")]
    pub api_key_env: String,

    /// Largest candidate set sent to the provider
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

fn default_true() -> bool {
    true
}

fn default_rerank_model() -> String {
    "rerank-multilingual-v3.0".to_string()
}

fn default_rerank_url() -> String {
    "https://api.cohere.com/v1".to_string()
}

fn default_rerank_key_env() -> String {
    "RERANK_API_KEY".to_string()
}

fn default_max_candidates() -> usize {
    100
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            model: default_rerank_model(),
            base_url: default_rerank_url(),
            api_key_env: default_rerank_key_env(),
            max_candidates: default_max_candidates(),
        }
    }
}

/// Cache backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    /// Process-local map
    Memory,
    /// Sqlite table shared between processes
    Sqlite,
}

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether caching runs at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Backend
    #[serde(default = "default_cache_backend")]
    pub backend: CacheBackendKind,

    /// Database url for the sqlite backend
    #[serde(default = "default_cache_url")]
    pub sqlite_url: String,

    /// Embedding TTL in seconds
    #[serde(default = "default_embedding_ttl")]
    pub embedding_ttl_secs: u64,

    /// Query result TTL in seconds
    #[serde(default = "default_query_ttl")]
    pub query_ttl_secs: u64,

    /// Chunk text TTL in seconds
    #[serde(default = "default_chunk_ttl")]
    pub chunk_ttl_secs: u64,
}

fn default_cache_backend() -> CacheBackendKind {
    CacheBackendKind::Memory
}

fn default_cache_url() -> String {
    "sqlite://tenantrag-cache.db?mode=rwc".to_string()
}

fn default_embedding_ttl() -> u64 {
    7 * 24 * 3600
}

fn default_query_ttl() -> u64 {
    3600
}

fn default_chunk_ttl() -> u64 {
    24 * 3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            backend: default_cache_backend(),
            sqlite_url: default_cache_url(),
            embedding_ttl_secs: default_embedding_ttl(),
            query_ttl_secs: default_query_ttl(),
            chunk_ttl_secs: default_chunk_ttl(),
        }
    }
}

/// How documents are split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingMode {
    /// Flat overlapping windows
    Fixed,
    /// Parent windows subdivided into overlapping children
    ParentChild,
}

/// Ingestion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Chunking mode
    #[serde(default = "default_chunking")]
    pub chunking: ChunkingMode,

    /// Fixed window size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Fixed window overlap in characters
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Parent window size in characters
    #[serde(default = "default_parent_size")]
    pub parent_size: usize,

    /// Child window size in characters
    #[serde(default = "default_child_size")]
    pub child_size: usize,

    /// Child window overlap in characters
    #[serde(default = "default_child_overlap")]
    pub child_overlap: usize,

    /// Smallest batch
    #[serde(default = "default_batch_min")]
    pub batch_min: usize,

    /// Starting batch
    #[serde(default = "default_batch_initial")]
    pub batch_initial: usize,

    /// Largest batch
    #[serde(default = "default_batch_max")]
    pub batch_max: usize,

    /// Batches faster than this grow
    #[serde(default = "default_fast_batch_ms")]
    pub fast_batch_ms: u64,

    /// Batches slower than this shrink
    #[serde(default = "default_slow_batch_ms")]
    pub slow_batch_ms: u64,

    /// Persist the checkpoint after this many processed chunks
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
}

fn default_chunking() -> ChunkingMode {
    ChunkingMode::Fixed
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_parent_size() -> usize {
    2000
}

fn default_child_size() -> usize {
    400
}

fn default_child_overlap() -> usize {
    50
}

fn default_batch_min() -> usize {
    10
}

fn default_batch_initial() -> usize {
    50
}

fn default_batch_max() -> usize {
    200
}

fn default_fast_batch_ms() -> u64 {
    1_000
}

fn default_slow_batch_ms() -> u64 {
    5_000
}

fn default_checkpoint_interval() -> usize {
    100
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunking: default_chunking(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            parent_size: default_parent_size(),
            child_size: default_child_size(),
            child_overlap: default_child_overlap(),
            batch_min: default_batch_min(),
            batch_initial: default_batch_initial(),
            batch_max: default_batch_max(),
            fast_batch_ms: default_fast_batch_ms(),
            slow_batch_ms: default_slow_batch_ms(),
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

/// Query settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Results returned to the caller
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Best score below which the outcome is low relevance
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,

    /// Per-namespace candidates fetched per requested result
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Dense share of the hybrid score
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f32,
}

fn default_top_k() -> usize {
    5
}

fn default_relevance_threshold() -> f32 {
    0.3
}

fn default_candidate_multiplier() -> usize {
    3
}

fn default_hybrid_alpha() -> f32 {
    0.75
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            relevance_threshold: default_relevance_threshold(),
            candidate_multiplier: default_candidate_multiplier(),
            hybrid_alpha: default_hybrid_alpha(),
        }
    }
}

/// Hosted vector index settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Index host url, empty selects the in-memory store
    #[serde(default)]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_vector_key_env")]
    pub api_key_env: String,

    /// Index name
    #[serde(default = "default_index_name")]
    pub index_name: String,
}

fn default_vector_key_env() -> String {
    "PINECONE_API_KEY".to_string()
}

fn default_index_name() -> String {
    "tenantrag".to_string()
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key_env: default_vector_key_env(),
            index_name: default_index_name(),
        }
    }
}

/// Checkpoint and audit store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Sqlite database url
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

fn default_database_url() -> String {
    "sqlite://tenantrag.db?mode=rwc".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
        }
    }
}
