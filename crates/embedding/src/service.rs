//! Hybrid dense + sparse embedding with caching and rate limiting.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tenantrag_cache::CacheLayer;
use tenantrag_core::{content_hash, RagError, Result, SparseVector};
use tracing::{debug, info};

use crate::provider::EmbeddingProvider;
use crate::rate_limiter::RateLimiter;
use crate::sparse::SparseEncoder;

/// Estimated provider tokens for `text` (four characters per token).
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / 4) as u64
}

/// Dense and sparse representation of one text.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridEmbedding {
    /// Dense vector
    pub dense: Vec<f32>,

    /// Sparse vector
    pub sparse: SparseVector,
}

/// Embedding front door used by ingestion and queries.
///
/// Dense vectors are cached by `(model, content hash)`. Provider calls go
/// through the shared rate limiter and provider errors are returned as is.
pub struct HybridEmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<CacheLayer>,
    limiter: Arc<RateLimiter>,
    sparse: SparseEncoder,
}

impl HybridEmbeddingService {
    /// Create a new service.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<CacheLayer>,
        limiter: Arc<RateLimiter>,
        sparse: SparseEncoder,
    ) -> Self {
        Self {
            provider,
            cache,
            limiter,
            sparse,
        }
    }

    /// Model of the underlying provider.
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Dense dimension of the underlying provider.
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Dense embedding of one text.
    pub async fn dense_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.dense_embedding_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::provider("embedding", "empty response for single text"))
    }

    /// Dense embeddings of `texts`, in order.
    ///
    /// Only texts missing from the cache are sent to the provider, each
    /// distinct text once, in requests no larger than the provider limit.
    pub async fn dense_embedding_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let model = self.provider.model_name().to_string();
        let hashes: Vec<String> = texts.iter().map(|t| content_hash(t)).collect();
        let cached = self.cache.get_embeddings(&model, &hashes).await;

        let mut resolved: HashMap<String, Vec<f32>> = HashMap::new();
        let mut pending: Vec<(String, String)> = Vec::new();
        let mut queued: HashSet<&str> = HashSet::new();
        for ((hash, text), hit) in hashes.iter().zip(texts).zip(cached) {
            match hit {
                Some(vector) if vector.len() == self.provider.dimension() => {
                    resolved.insert(hash.clone(), vector);
                }
                _ => {
                    if queued.insert(hash.as_str()) {
                        pending.push((hash.clone(), text.clone()));
                    }
                }
            }
        }

        debug!(
            total = texts.len(),
            cached = texts.len() - pending.len(),
            to_embed = pending.len(),
            "Dense embedding batch"
        );

        for group in pending.chunks(self.provider.max_batch_size().max(1)) {
            let group_texts: Vec<String> = group.iter().map(|(_, t)| t.clone()).collect();
            let tokens: u64 = group_texts.iter().map(|t| estimate_tokens(t).max(1)).sum();
            self.limiter.acquire(tokens).await?;

            let vectors = self.provider.embed_batch(&group_texts).await?;
            if vectors.len() != group.len() {
                return Err(RagError::provider(
                    "embedding",
                    format!("expected {} embeddings, got {}", group.len(), vectors.len()),
                ));
            }

            let fresh: Vec<(String, Vec<f32>)> = group
                .iter()
                .map(|(h, _)| h.clone())
                .zip(vectors)
                .collect();
            self.cache.put_embeddings(&model, &fresh).await;
            resolved.extend(fresh);
        }

        hashes
            .iter()
            .map(|h| {
                resolved
                    .get(h)
                    .cloned()
                    .ok_or_else(|| RagError::provider("embedding", "missing embedding for input"))
            })
            .collect()
    }

    /// Sparse embedding of one text. Never fails.
    pub fn sparse_embedding(&self, text: &str) -> SparseVector {
        self.sparse.encode(text)
    }

    /// Dense and sparse embeddings of `texts`, in order.
    pub async fn embed_hybrid(&self, texts: &[String]) -> Result<Vec<HybridEmbedding>> {
        let dense = self.dense_embedding_batch(texts).await?;
        Ok(dense
            .into_iter()
            .zip(texts)
            .map(|(dense, text)| HybridEmbedding {
                dense,
                sparse: self.sparse.encode(text),
            })
            .collect())
    }

    /// Hybrid embedding of a query.
    pub async fn embed_query(&self, text: &str) -> Result<HybridEmbedding> {
        let dense = self.dense_embedding(text).await?;
        info!(chars = text.chars().count(), "Embedded query");
        Ok(HybridEmbedding {
            dense,
            sparse: self.sparse.encode(text),
        })
    }
}
