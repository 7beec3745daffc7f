//! Chunks produced by ingestion.

use crate::access::ClearanceTier;
use crate::hash::content_hash;
use crate::search::{keys, Metadata, MetadataValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structured metadata carried by every chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Owning entity, absent for shared and public material
    pub owner_id: Option<String>,

    /// Owning tenant, absent for public material
    pub tenant_id: Option<String>,

    /// Required clearance to read the chunk
    pub clearance: ClearanceTier,

    /// Source document id
    pub document_id: String,

    /// Position within the document
    pub chunk_index: usize,

    /// Kind of source document
    pub doc_type: String,

    /// Parent window id (parent/child chunking)
    pub parent_id: Option<String>,

    /// Parent window content (parent/child chunking)
    pub parent_text: Option<String>,

    /// Free-form fields from the source. `None` values are dropped on upsert.
    #[serde(default)]
    pub extra: BTreeMap<String, Option<MetadataValue>>,
}

/// A unit of indexed content. Immutable once upserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Text returned as context
    pub content: String,

    /// Text sent to the embedding provider
    pub embedding_text: String,

    /// Hash of `content`
    pub content_hash: String,

    /// Namespace the chunk is written to
    pub namespace: String,

    /// Structured metadata
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Create a chunk whose embedding text is its content.
    pub fn new(content: impl Into<String>, namespace: impl Into<String>, metadata: ChunkMetadata) -> Self {
        let content = content.into();
        Self {
            embedding_text: content.clone(),
            content_hash: content_hash(&content),
            content,
            namespace: namespace.into(),
            metadata,
        }
    }

    /// Flatten into the metadata map stored next to the vector.
    ///
    /// Source fields named like a reserved key are dropped, so a chunk
    /// without an owner can never carry a spoofed one.
    pub fn to_metadata(&self) -> Metadata {
        let m = &self.metadata;
        let mut out: Metadata = m
            .extra
            .iter()
            .filter(|(k, _)| !keys::RESERVED.contains(&k.as_str()))
            .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
            .collect();

        if let Some(owner) = &m.owner_id {
            out.insert(keys::OWNER_ID.into(), owner.as_str().into());
        }
        if let Some(tenant) = &m.tenant_id {
            out.insert(keys::TENANT_ID.into(), tenant.as_str().into());
        }
        out.insert(keys::CLEARANCE_LEVEL.into(), (m.clearance.level() as f64).into());
        out.insert(keys::DOCUMENT_ID.into(), m.document_id.as_str().into());
        out.insert(keys::CHUNK_INDEX.into(), m.chunk_index.into());
        out.insert(keys::DOC_TYPE.into(), m.doc_type.as_str().into());
        out.insert(keys::NAMESPACE.into(), self.namespace.as_str().into());
        out.insert(keys::CONTENT_HASH.into(), self.content_hash.as_str().into());
        out.insert(keys::TEXT.into(), self.content.as_str().into());
        if let Some(parent) = &m.parent_id {
            out.insert(keys::PARENT_ID.into(), parent.as_str().into());
        }
        if let Some(parent_text) = &m.parent_text {
            out.insert(keys::PARENT_TEXT.into(), parent_text.as_str().into());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_metadata_drops_nulls_and_keeps_reserved_keys() {
        let mut extra = BTreeMap::new();
        extra.insert("branch".to_string(), Some(MetadataValue::from("seoul")));
        extra.insert("manager".to_string(), None);
        extra.insert(keys::OWNER_ID.to_string(), Some(MetadataValue::from("spoof")));

        let chunk = Chunk::new(
            "base pay 3,000,000",
            "employee_1001",
            ChunkMetadata {
                owner_id: Some("1001".into()),
                tenant_id: Some("hof".into()),
                clearance: ClearanceTier::Standard,
                document_id: "stmt-2024-05".into(),
                chunk_index: 3,
                doc_type: "pay_statement".into(),
                extra,
                ..Default::default()
            },
        );

        let meta = chunk.to_metadata();
        assert_eq!(meta.get("branch"), Some(&MetadataValue::from("seoul")));
        assert!(!meta.contains_key("manager"));
        assert_eq!(meta.get(keys::OWNER_ID), Some(&MetadataValue::from("1001")));
        assert_eq!(meta.get(keys::CLEARANCE_LEVEL), Some(&MetadataValue::Number(2.0)));
        assert_eq!(meta.get(keys::CHUNK_INDEX), Some(&MetadataValue::Number(3.0)));
        assert_eq!(meta.get(keys::NAMESPACE), Some(&MetadataValue::from("employee_1001")));
        assert!(!meta.contains_key(keys::PARENT_ID));
    }

    #[test]
    fn test_reserved_source_fields_never_survive() {
        let mut extra = BTreeMap::new();
        extra.insert(keys::OWNER_ID.to_string(), Some(MetadataValue::from("spoof")));
        extra.insert(keys::TENANT_ID.to_string(), Some(MetadataValue::from("acme")));

        let chunk = Chunk::new(
            "public notice",
            "public",
            ChunkMetadata {
                document_id: "notice-1".into(),
                extra,
                ..Default::default()
            },
        );
        let meta = chunk.to_metadata();
        assert!(!meta.contains_key(keys::OWNER_ID));
        assert!(!meta.contains_key(keys::TENANT_ID));
    }

    #[test]
    fn test_content_hash_follows_content() {
        let a = Chunk::new("same", "public", ChunkMetadata::default());
        let b = Chunk::new("same", "public", ChunkMetadata::default());
        let c = Chunk::new("other", "public", ChunkMetadata::default());
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.content_hash, c.content_hash);
    }
}
