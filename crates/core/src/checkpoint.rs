//! Ingestion checkpoints and their status state machine.

use crate::error::{RagError, Result};
use crate::id::BatchId;
use crate::Time;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Checkpoint status.
///
/// ```text
/// pending -> in_progress -> { completed | failed | paused }
/// failed | paused -> in_progress   (resume)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Created, nothing processed yet
    Pending,
    /// Batches are being committed
    InProgress,
    /// All chunks committed
    Completed,
    /// Stopped on an error, progress kept
    Failed,
    /// Stopped on request, progress kept
    Paused,
}

impl CheckpointStatus {
    /// Transition table.
    pub fn can_transition_to(self, next: CheckpointStatus) -> bool {
        use CheckpointStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Paused)
                | (Failed, InProgress)
                | (Paused, InProgress)
        )
    }

    /// Whether no further work will happen without a resume.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Paused)
    }

    /// Storage label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckpointStatus {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "paused" => Ok(Self::Paused),
            other => Err(RagError::CheckpointCorruption(format!(
                "unknown checkpoint status '{other}'"
            ))),
        }
    }
}

/// Opaque payload persisted with a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointData {
    /// Fingerprint of the document content and metadata this run ingests
    pub content_hash: String,

    /// Namespace the run writes to
    pub namespace: String,

    /// Vector ids of the last committed batch
    pub last_vector_ids: Vec<String>,

    /// Batch size at the time of the last save
    pub batch_size: usize,
}

/// Durable record of ingestion progress for one document run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Document being ingested
    pub document_id: String,

    /// Run identifier
    pub batch_id: BatchId,

    /// Number of chunks the document produced
    pub total_chunks: usize,

    /// Number of chunks committed, never decreases within a run
    pub last_processed_chunk: usize,

    /// Current status
    pub status: CheckpointStatus,

    /// Payload
    pub data: CheckpointData,

    /// Error of the last failure
    pub error_message: Option<String>,

    /// Creation timestamp
    pub created_at: Time,

    /// Last update timestamp
    pub updated_at: Time,
}

impl Checkpoint {
    /// Fresh pending checkpoint.
    pub fn new(document_id: impl Into<String>, total_chunks: usize, data: CheckpointData) -> Self {
        let now = chrono::Utc::now();
        Self {
            document_id: document_id.into(),
            batch_id: BatchId::new(),
            total_chunks,
            last_processed_chunk: 0,
            status: CheckpointStatus::Pending,
            data,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting moves outside the transition table.
    pub fn transition(&mut self, next: CheckpointStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(RagError::IllegalTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        if next == CheckpointStatus::InProgress {
            self.error_message = None;
        }
        self.status = next;
        self.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Record that chunks up to `processed` (exclusive) are committed.
    pub fn record_progress(&mut self, processed: usize, committed_ids: Vec<String>) -> Result<()> {
        if processed < self.last_processed_chunk {
            return Err(RagError::CheckpointCorruption(format!(
                "progress for {} moved backwards: {} -> {}",
                self.document_id, self.last_processed_chunk, processed
            )));
        }
        if processed > self.total_chunks {
            return Err(RagError::CheckpointCorruption(format!(
                "progress for {} exceeds total chunks: {} > {}",
                self.document_id, processed, self.total_chunks
            )));
        }
        self.last_processed_chunk = processed;
        self.data.last_vector_ids = committed_ids;
        self.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Transition to failed and keep the error.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(CheckpointStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Whether all chunks are committed.
    pub fn is_complete(&self) -> bool {
        self.status == CheckpointStatus::Completed
    }

    /// Chunks still to process.
    pub fn remaining(&self) -> usize {
        self.total_chunks.saturating_sub(self.last_processed_chunk)
    }
}
