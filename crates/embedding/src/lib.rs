//! Dense and sparse text embeddings for TenantRAG.
//!
//! Dense vectors come from an [`EmbeddingProvider`] behind a shared
//! [`RateLimiter`] and the embedding cache; sparse vectors are computed
//! locally by the [`SparseEncoder`].

#![warn(missing_docs)]

pub mod provider;
pub mod rate_limiter;
pub mod service;
pub mod sparse;

pub use provider::{validate_batch, EmbeddingProvider, OpenAiEmbeddingClient};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use service::{estimate_tokens, HybridEmbedding, HybridEmbeddingService};
pub use sparse::{tokenize, SparseEncoder, DEFAULT_BUCKETS};
