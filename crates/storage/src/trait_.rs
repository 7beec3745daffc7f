//! Storage trait abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tenantrag_core::{BatchId, Checkpoint, RagError, Time};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl From<StorageError> for RagError {
    fn from(e: StorageError) -> Self {
        RagError::Storage(e.to_string())
    }
}

/// Durable checkpoint persistence for ingestion runs.
///
/// One row per `(document_id, batch_id)`. Saving an existing pair
/// overwrites it.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Save a checkpoint (create or update).
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Load a specific run of a document.
    async fn load_checkpoint(&self, document_id: &str, batch_id: BatchId) -> Result<Option<Checkpoint>>;

    /// Load the most recently created run of a document.
    async fn latest_checkpoint(&self, document_id: &str) -> Result<Option<Checkpoint>>;

    /// List checkpoints, newest first. `None` lists every document.
    async fn list_checkpoints(&self, document_id: Option<&str>) -> Result<Vec<Checkpoint>>;
}

/// One denied search match, kept for alerting and review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Record id
    pub id: String,

    /// When the denial happened
    pub occurred_at: Time,

    /// Tenant of the caller
    pub tenant_id: String,

    /// Entity of the caller
    pub entity_id: Option<String>,

    /// Vector id of the dropped match
    pub match_id: String,

    /// Namespace the match came from
    pub namespace: String,

    /// Denial reason
    pub reason: String,
}

impl AuditRecord {
    /// New record stamped now.
    pub fn new(
        tenant_id: impl Into<String>,
        entity_id: Option<String>,
        match_id: impl Into<String>,
        namespace: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            occurred_at: chrono::Utc::now(),
            tenant_id: tenant_id.into(),
            entity_id,
            match_id: match_id.into(),
            namespace: namespace.into(),
            reason: reason.into(),
        }
    }
}

/// Access-denial audit trail.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append a denial.
    async fn record_denial(&self, record: &AuditRecord) -> Result<()>;

    /// Most recent denials, newest first.
    async fn list_denials(&self, limit: usize) -> Result<Vec<AuditRecord>>;
}
