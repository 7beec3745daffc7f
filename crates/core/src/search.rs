//! Search requests, metadata filters and matches.

use crate::namespace::{NamespaceKind, SearchMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved metadata keys written on every vector.
pub mod keys {
    /// Entity that owns the chunk
    pub const OWNER_ID: &str = "owner_id";
    /// Tenant the chunk belongs to
    pub const TENANT_ID: &str = "tenant_id";
    /// Numeric clearance level required to read the chunk
    pub const CLEARANCE_LEVEL: &str = "clearance_level";
    /// Source document id
    pub const DOCUMENT_ID: &str = "document_id";
    /// Position of the chunk within its document
    pub const CHUNK_INDEX: &str = "chunk_index";
    /// Kind of source document
    pub const DOC_TYPE: &str = "doc_type";
    /// Namespace the chunk was written to
    pub const NAMESPACE: &str = "namespace";
    /// Content hash of the chunk
    pub const CONTENT_HASH: &str = "content_hash";
    /// Chunk content
    pub const TEXT: &str = "text";
    /// Parent window id for parent/child chunking
    pub const PARENT_ID: &str = "parent_id";
    /// Parent window content
    pub const PARENT_TEXT: &str = "parent_text";

    /// Every reserved key. Source fields with these names are discarded.
    pub const RESERVED: [&str; 11] = [
        OWNER_ID,
        TENANT_ID,
        CLEARANCE_LEVEL,
        DOCUMENT_ID,
        CHUNK_INDEX,
        DOC_TYPE,
        NAMESPACE,
        CONTENT_HASH,
        TEXT,
        PARENT_ID,
        PARENT_TEXT,
    ];
}

/// A metadata value as stored in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Boolean flag
    Bool(bool),
    /// Numeric value
    Number(f64),
    /// String value
    Text(String),
    /// List of strings
    List(Vec<String>),
}

impl MetadataValue {
    /// String content, if this is a text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric content, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Metadata map attached to a vector.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// One condition of a [`MetadataFilter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterCondition {
    /// Field equals value
    Eq(MetadataValue),
    /// Field equals one of the values
    In(Vec<MetadataValue>),
    /// Numeric field is less than or equal to the bound
    Lte(f64),
}

impl FilterCondition {
    fn matches(&self, value: Option<&MetadataValue>) -> bool {
        match (self, value) {
            (Self::Eq(expected), Some(actual)) => expected == actual,
            (Self::In(options), Some(actual)) => options.contains(actual),
            (Self::Lte(bound), Some(actual)) => actual.as_f64().is_some_and(|n| n <= *bound),
            (_, None) => false,
        }
    }

    fn to_wire(&self) -> serde_json::Value {
        match self {
            Self::Eq(v) => serde_json::json!({ "$eq": v }),
            Self::In(vs) => serde_json::json!({ "$in": vs }),
            Self::Lte(n) => serde_json::json!({ "$lte": n }),
        }
    }
}

/// Conjunction of per-field conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    /// Conditions by field name, all must hold
    pub conditions: BTreeMap<String, FilterCondition>,
}

impl MetadataFilter {
    /// Empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition.
    pub fn equals(mut self, field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.conditions
            .insert(field.into(), FilterCondition::Eq(value.into()));
        self
    }

    /// Add a membership condition.
    pub fn one_of(mut self, field: impl Into<String>, values: Vec<MetadataValue>) -> Self {
        self.conditions.insert(field.into(), FilterCondition::In(values));
        self
    }

    /// Add an upper bound condition.
    pub fn at_most(mut self, field: impl Into<String>, bound: f64) -> Self {
        self.conditions.insert(field.into(), FilterCondition::Lte(bound));
        self
    }

    /// Combine two filters. Conditions of `other` win on conflicting fields.
    pub fn merge(mut self, other: &MetadataFilter) -> Self {
        for (field, cond) in &other.conditions {
            self.conditions.insert(field.clone(), cond.clone());
        }
        self
    }

    /// Whether there are no conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate against a metadata map.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions
            .iter()
            .all(|(field, cond)| cond.matches(metadata.get(field)))
    }

    /// Mongo-style filter document understood by hosted vector stores.
    pub fn to_wire(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .conditions
            .iter()
            .map(|(field, cond)| (field.clone(), cond.to_wire()))
            .collect();
        serde_json::Value::Object(map)
    }
}

/// Sparse vector with ascending, unique bucket indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    /// Bucket indices
    pub indices: Vec<u32>,

    /// Weights, parallel to `indices`
    pub values: Vec<f32>,
}

impl SparseVector {
    /// Build from `(index, value)` pairs. Duplicate indices are summed.
    pub fn new(mut pairs: Vec<(u32, f32)>) -> Self {
        pairs.sort_by_key(|(i, _)| *i);
        let mut indices: Vec<u32> = Vec::with_capacity(pairs.len());
        let mut values: Vec<f32> = Vec::with_capacity(pairs.len());
        for (index, value) in pairs {
            if indices.last() == Some(&index) {
                if let Some(last) = values.last_mut() {
                    *last += value;
                }
            } else {
                indices.push(index);
                values.push(value);
            }
        }
        Self { indices, values }
    }

    /// Whether the vector has no entries.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Multiply every weight by `factor`.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            indices: self.indices.clone(),
            values: self.values.iter().map(|v| v * factor).collect(),
        }
    }
}

/// A namespace targeted by a search, with its weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceTarget {
    /// Concrete namespace name
    pub namespace: String,

    /// Taxonomy kind of the namespace
    pub kind: NamespaceKind,

    /// Score multiplier
    pub weight: f32,
}

/// Logical query fanned out over several namespaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Dense query vector
    pub vector: Vec<f32>,

    /// Sparse query vector
    pub sparse: Option<SparseVector>,

    /// Structured filter, removable by the fallback retry
    pub filter: Option<MetadataFilter>,

    /// Number of results wanted
    pub top_k: usize,

    /// Targets in priority order
    pub targets: Vec<NamespaceTarget>,

    /// Ordering mode
    pub mode: SearchMode,
}

/// Single-namespace query sent to the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorQuery {
    /// Dense query vector
    pub vector: Vec<f32>,

    /// Sparse query vector
    pub sparse: Option<SparseVector>,

    /// Dense share of the hybrid score, sparse gets `1 - alpha`
    pub alpha: f32,

    /// Number of matches to return
    pub top_k: usize,

    /// Metadata filter
    pub filter: Option<MetadataFilter>,
}

/// Rerank details preserved alongside the original ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankInfo {
    /// New relevance score
    pub score: f32,

    /// Rank before reranking (0-based)
    pub original_rank: usize,

    /// Weighted score before reranking
    pub original_score: f32,

    /// Synthetic score produced because the provider failed
    pub fallback: bool,
}

/// One match returned from a namespace search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    /// Vector id
    pub id: String,

    /// Raw relevance score from the store
    pub score: f32,

    /// Score after namespace weighting
    #[serde(default)]
    pub weighted_score: f32,

    /// Stored metadata
    pub metadata: Metadata,

    /// Namespace the match came from
    pub namespace: String,

    /// Present once the match went through rerank fusion
    #[serde(default)]
    pub rerank: Option<RerankInfo>,
}

impl SearchMatch {
    /// Score that ranks this match: the rerank score when a real rerank
    /// happened, otherwise the weighted score.
    pub fn relevance(&self) -> f32 {
        match &self.rerank {
            Some(info) if !info.fallback => info.score,
            _ => self.weighted_score,
        }
    }

    /// String metadata field.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(MetadataValue::as_str)
    }
}

/// Sort matches by descending weighted score, ties broken by id.
pub fn sort_by_weighted_score(matches: &mut [SearchMatch]) {
    matches.sort_by(|a, b| {
        b.weighted_score
            .partial_cmp(&a.weighted_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, MetadataValue)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_filter_matches() {
        let m = meta(&[
            (keys::OWNER_ID, "1001".into()),
            (keys::CLEARANCE_LEVEL, 2.0.into()),
        ]);

        let f = MetadataFilter::new()
            .equals(keys::OWNER_ID, "1001")
            .at_most(keys::CLEARANCE_LEVEL, 2.0);
        assert!(f.matches(&m));

        let f = MetadataFilter::new().equals(keys::OWNER_ID, "2002");
        assert!(!f.matches(&m));

        let f = MetadataFilter::new().at_most(keys::CLEARANCE_LEVEL, 1.0);
        assert!(!f.matches(&m));
    }

    #[test]
    fn test_filter_missing_field_fails_closed() {
        let f = MetadataFilter::new().equals(keys::OWNER_ID, "1001");
        assert!(!f.matches(&Metadata::new()));
        assert!(MetadataFilter::new().matches(&Metadata::new()));
    }

    #[test]
    fn test_filter_wire_format() {
        let f = MetadataFilter::new()
            .equals(keys::OWNER_ID, "1001")
            .at_most(keys::CLEARANCE_LEVEL, 2.0);
        let wire = f.to_wire();
        assert_eq!(wire["owner_id"]["$eq"], "1001");
        assert_eq!(wire["clearance_level"]["$lte"], 2.0);
    }

    #[test]
    fn test_sparse_vector_sorted_and_deduplicated() {
        let v = SparseVector::new(vec![(9, 1.0), (2, 0.5), (9, 0.25)]);
        assert_eq!(v.indices, vec![2, 9]);
        assert_eq!(v.values, vec![0.5, 1.25]);
    }

    #[test]
    fn test_sort_by_weighted_score() {
        let mk = |id: &str, w: f32| SearchMatch {
            id: id.to_string(),
            score: w,
            weighted_score: w,
            metadata: Metadata::new(),
            namespace: "ns".to_string(),
            rerank: None,
        };
        let mut matches = vec![mk("b", 0.5), mk("a", 0.5), mk("c", 0.9)];
        sort_by_weighted_score(&mut matches);
        let ids: Vec<_> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
