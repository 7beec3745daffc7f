//! Identifiers for ingestion runs and indexed vectors.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for one ingestion run of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(Ulid);

impl BatchId {
    /// Generate a new BatchId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for BatchId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Build the deterministic vector id for a chunk.
///
/// The same `(namespace, document, chunk index)` always yields the same id,
/// so re-upserting after a crash overwrites instead of duplicating.
pub fn vector_id(namespace: &str, document_id: &str, chunk_index: usize) -> String {
    format!("{namespace}#{document_id}#{chunk_index:06}")
}

/// Split a vector id back into `(namespace, document_id, chunk_index)`.
pub fn parse_vector_id(id: &str) -> Option<(&str, &str, usize)> {
    // Namespaces never contain '#', document ids may.
    let (namespace, rest) = id.split_once('#')?;
    let (document_id, index) = rest.rsplit_once('#')?;
    Some((namespace, document_id, index.parse().ok()?))
}
