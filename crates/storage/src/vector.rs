//! Namespace-partitioned vector index.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tenantrag_core::{
    cosine_similarity, sparse_dot, Metadata, Result, SearchMatch, SparseVector, VectorQuery,
};
use tokio::sync::RwLock;

/// A vector written to the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Deterministic vector id
    pub id: String,

    /// Dense values
    pub values: Vec<f32>,

    /// Sparse values
    pub sparse: Option<SparseVector>,

    /// Stored metadata
    pub metadata: Metadata,
}

/// Index-wide vector counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Dense dimension, zero when unknown
    pub dimension: usize,

    /// Vectors across all namespaces
    pub total_vector_count: u64,

    /// Vectors per namespace
    pub namespaces: BTreeMap<String, u64>,
}

/// Vector index trait.
///
/// Upserts are idempotent by id. Reads after an upsert may be eventually
/// consistent.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or overwrite `records` in `namespace`. Returns the count written.
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<usize>;

    /// Nearest neighbours of `query` within `namespace`.
    async fn query(&self, namespace: &str, query: &VectorQuery) -> Result<Vec<SearchMatch>>;

    /// Vector counts per namespace.
    async fn describe_stats(&self) -> Result<IndexStats>;
}

/// Hybrid score used by the in-memory store.
///
/// Dense cosine weighted by `alpha`, sparse dot product by `1 - alpha`.
/// Without sparse values on both sides the dense score is used alone.
pub fn hybrid_score(query: &VectorQuery, record: &VectorRecord) -> f32 {
    let dense = cosine_similarity(&query.vector, &record.values);
    match (&query.sparse, &record.sparse) {
        (Some(q), Some(r)) if !q.is_empty() && !r.is_empty() => {
            query.alpha * dense + (1.0 - query.alpha) * sparse_dot(q, r)
        }
        _ => dense,
    }
}

/// In-memory vector store implementation.
#[derive(Clone, Default)]
pub struct InMemoryVectorStore {
    namespaces: Arc<RwLock<HashMap<String, BTreeMap<String, VectorRecord>>>>,
}

impl InMemoryVectorStore {
    /// Create a new in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids stored in `namespace`, sorted.
    pub async fn ids(&self, namespace: &str) -> Vec<String> {
        let namespaces = self.namespaces.read().await;
        namespaces
            .get(namespace)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Fetch a single record.
    pub async fn get(&self, namespace: &str, id: &str) -> Option<VectorRecord> {
        let namespaces = self.namespaces.read().await;
        namespaces.get(namespace).and_then(|records| records.get(id).cloned())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<usize> {
        let count = records.len();
        let mut namespaces = self.namespaces.write().await;
        let entry = namespaces.entry(namespace.to_string()).or_default();
        for record in records {
            entry.insert(record.id.clone(), record);
        }
        Ok(count)
    }

    async fn query(&self, namespace: &str, query: &VectorQuery) -> Result<Vec<SearchMatch>> {
        let namespaces = self.namespaces.read().await;
        let Some(records) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut results: Vec<SearchMatch> = records
            .values()
            .filter(|r| query.filter.as_ref().map_or(true, |f| f.matches(&r.metadata)))
            .map(|r| {
                let score = hybrid_score(query, r);
                SearchMatch {
                    id: r.id.clone(),
                    score,
                    weighted_score: score,
                    metadata: r.metadata.clone(),
                    namespace: namespace.to_string(),
                    rerank: None,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(query.top_k);
        Ok(results)
    }

    async fn describe_stats(&self) -> Result<IndexStats> {
        let namespaces = self.namespaces.read().await;
        let mut stats = IndexStats::default();
        for (name, records) in namespaces.iter() {
            if stats.dimension == 0 {
                stats.dimension = records.values().next().map_or(0, |r| r.values.len());
            }
            stats.total_vector_count += records.len() as u64;
            stats.namespaces.insert(name.clone(), records.len() as u64);
        }
        Ok(stats)
    }
}
