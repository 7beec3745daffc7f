//! TenantRAG core data models.
//!
//! This crate defines the types shared by the ingestion pipeline and the
//! query engine: chunks, namespaces, checkpoints, search requests and
//! matches, authorization context, errors and configuration.

#![warn(missing_docs)]

// Identities and hashing
mod hash;
mod id;

// Errors and configuration
mod config;
mod error;
mod retry;

// Partitioning and access
mod access;
mod intent;
mod namespace;

// Index content
mod checkpoint;
mod chunk;
mod search;
mod similarity;

// Re-exports
pub use hash::{content_hash, stable_u32};
pub use id::{parse_vector_id, vector_id, BatchId};

pub use config::{
    api_key_from_env, AppConfig, CacheBackendKind, CacheConfig, ChunkingMode, EmbeddingConfig,
    IngestionConfig, RerankConfig, RetrievalConfig, StorageConfig, VectorStoreConfig,
};
pub use error::{RagError, Result};
pub use retry::{transient_err, with_retry, RetryConfig};

pub use access::{AccessDecision, AuthContext, ClearanceTier};
pub use intent::QueryIntent;
pub use namespace::{
    generate_namespace, get_strategy, kind_for_mode, NamespaceContext, NamespaceKind,
    NamespacePrefixes, NamespaceStrategy, ProcessingMode, SearchMode, StrategyRequest,
};

pub use checkpoint::{Checkpoint, CheckpointData, CheckpointStatus};
pub use chunk::{Chunk, ChunkMetadata};
pub use search::{
    keys, sort_by_weighted_score, FilterCondition, Metadata, MetadataFilter, MetadataValue,
    NamespaceTarget, RerankInfo, SearchMatch, SearchQuery, SparseVector, VectorQuery,
};
pub use similarity::{cosine_similarity, sparse_dot};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
