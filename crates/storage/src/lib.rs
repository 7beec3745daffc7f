//! Storage abstraction and implementations for TenantRAG.
//!
//! This crate provides the checkpoint and audit stores used by ingestion
//! and access control, plus the namespace-partitioned vector index
//! contract with an in-memory and a hosted implementation.

#![warn(missing_docs)]

pub mod memory_storage;
pub mod pinecone;
#[cfg(feature = "sqlite")]
pub mod sqlite_storage;
pub mod trait_;
pub mod vector;

pub use memory_storage::MemoryStorage;
pub use pinecone::PineconeVectorStore;
#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteStorage;
pub use trait_::{AuditRecord, AuditStore, CheckpointStore, Result, StorageError};
pub use vector::{hybrid_score, IndexStats, InMemoryVectorStore, VectorRecord, VectorStore};
