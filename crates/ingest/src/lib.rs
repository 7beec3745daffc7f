//! Streaming ingestion for TenantRAG.
//!
//! Documents are chunked, embedded and upserted into their namespace in
//! adaptive batches. Progress is checkpointed so an interrupted run
//! resumes where it stopped without re-embedding committed chunks.

#![warn(missing_docs)]

pub mod batch;
pub mod chunker;
pub mod document;
pub mod processor;

pub use batch::AdaptiveBatchSizer;
pub use chunker::{split_windows, Chunker, ChunkingStrategy};
pub use document::SourceDocument;
pub use processor::{
    verify_ownership, IngestionReport, IngestionSummary, PauseHandle, StreamingIngestionProcessor,
};
