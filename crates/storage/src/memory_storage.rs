//! In-memory storage, used by tests and one-shot CLI runs.

use async_trait::async_trait;
use tenantrag_core::{BatchId, Checkpoint};
use tokio::sync::RwLock;

use super::trait_::{AuditRecord, AuditStore, CheckpointStore, Result};

/// Checkpoints and audit records kept in process memory.
#[derive(Default)]
pub struct MemoryStorage {
    /// Checkpoints in insertion order
    checkpoints: RwLock<Vec<Checkpoint>>,

    /// Denials in insertion order
    denials: RwLock<Vec<AuditRecord>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStorage {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().await;
        match checkpoints
            .iter_mut()
            .find(|c| c.document_id == checkpoint.document_id && c.batch_id == checkpoint.batch_id)
        {
            Some(existing) => *existing = checkpoint.clone(),
            None => checkpoints.push(checkpoint.clone()),
        }
        Ok(())
    }

    async fn load_checkpoint(&self, document_id: &str, batch_id: BatchId) -> Result<Option<Checkpoint>> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints
            .iter()
            .find(|c| c.document_id == document_id && c.batch_id == batch_id)
            .cloned())
    }

    async fn latest_checkpoint(&self, document_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.list_checkpoints(Some(document_id)).await?.into_iter().next())
    }

    async fn list_checkpoints(&self, document_id: Option<&str>) -> Result<Vec<Checkpoint>> {
        let checkpoints = self.checkpoints.read().await;
        // Reverse insertion order, then a stable sort, so created_at ties
        // resolve to the most recently inserted run.
        let mut out: Vec<Checkpoint> = checkpoints
            .iter()
            .rev()
            .filter(|c| document_id.map_or(true, |id| c.document_id == id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}

#[async_trait]
impl AuditStore for MemoryStorage {
    async fn record_denial(&self, record: &AuditRecord) -> Result<()> {
        self.denials.write().await.push(record.clone());
        Ok(())
    }

    async fn list_denials(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let denials = self.denials.read().await;
        Ok(denials.iter().rev().take(limit).cloned().collect())
    }
}
