//! SQLite storage backend for checkpoints and the audit trail.

use async_trait::async_trait;
use chrono::SecondsFormat;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use tenantrag_core::{BatchId, Checkpoint, CheckpointData, Time};

use super::trait_::{AuditRecord, AuditStore, CheckpointStore, Result, StorageError};

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
    /// Database connection pool
    pool: sqlx::SqlitePool,
}

fn db_err(e: sqlx::Error) -> StorageError {
    StorageError::Other(e.to_string())
}

fn timestamp(t: &Time) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(s: &str) -> Result<Time> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| StorageError::Other(format!("bad timestamp '{s}': {e}")))
}

impl SqliteStorage {
    /// Create a new SQLite storage instance.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = sqlx::SqlitePool::connect(database_url).await.map_err(db_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Create a new SQLite storage instance from a file path, creating the file if needed.
    pub async fn new_from_path(path: &Path) -> Result<Self> {
        Self::new(&format!("sqlite://{}?mode=rwc", path.display())).await
    }

    /// Create an in-memory SQLite storage for testing.
    ///
    /// A single connection keeps every query on the same in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                document_id TEXT NOT NULL,
                batch_id TEXT NOT NULL,
                total_chunks INTEGER NOT NULL,
                last_processed_chunk INTEGER NOT NULL,
                status TEXT NOT NULL,
                checkpoint_data TEXT NOT NULL,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (document_id, batch_id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS access_denials (
                id TEXT PRIMARY KEY,
                occurred_at TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                entity_id TEXT,
                match_id TEXT NOT NULL,
                namespace TEXT NOT NULL,
                reason TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_checkpoints_status ON checkpoints(status)")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(())
    }

    fn row_to_checkpoint(row: &SqliteRow) -> Result<Checkpoint> {
        let batch_id: String = row.try_get("batch_id").map_err(db_err)?;
        let status: String = row.try_get("status").map_err(db_err)?;
        let data: String = row.try_get("checkpoint_data").map_err(db_err)?;
        let total: i64 = row.try_get("total_chunks").map_err(db_err)?;
        let processed: i64 = row.try_get("last_processed_chunk").map_err(db_err)?;
        let created_at: String = row.try_get("created_at").map_err(db_err)?;
        let updated_at: String = row.try_get("updated_at").map_err(db_err)?;

        Ok(Checkpoint {
            document_id: row.try_get("document_id").map_err(db_err)?,
            batch_id: batch_id
                .parse::<BatchId>()
                .map_err(|e| StorageError::Other(format!("bad batch id '{batch_id}': {e}")))?,
            total_chunks: total.max(0) as usize,
            last_processed_chunk: processed.max(0) as usize,
            status: status.parse().map_err(|e: tenantrag_core::RagError| StorageError::Other(e.to_string()))?,
            data: serde_json::from_str::<CheckpointData>(&data)?,
            error_message: row.try_get("error_message").map_err(db_err)?,
            created_at: parse_time(&created_at)?,
            updated_at: parse_time(&updated_at)?,
        })
    }

    fn row_to_audit(row: &SqliteRow) -> Result<AuditRecord> {
        let occurred_at: String = row.try_get("occurred_at").map_err(db_err)?;
        Ok(AuditRecord {
            id: row.try_get("id").map_err(db_err)?,
            occurred_at: parse_time(&occurred_at)?,
            tenant_id: row.try_get("tenant_id").map_err(db_err)?,
            entity_id: row.try_get("entity_id").map_err(db_err)?,
            match_id: row.try_get("match_id").map_err(db_err)?,
            namespace: row.try_get("namespace").map_err(db_err)?,
            reason: row.try_get("reason").map_err(db_err)?,
        })
    }
}

const CHECKPOINT_COLUMNS: &str = "document_id, batch_id, total_chunks, last_processed_chunk, status, \
     checkpoint_data, error_message, created_at, updated_at";

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let data = serde_json::to_string(&checkpoint.data)?;

        // Upsert keeps the rowid, which breaks created_at ties in latest_checkpoint.
        sqlx::query(
            "INSERT INTO checkpoints (document_id, batch_id, total_chunks, last_processed_chunk, status,
                checkpoint_data, error_message, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (document_id, batch_id) DO UPDATE SET
                total_chunks = excluded.total_chunks,
                last_processed_chunk = excluded.last_processed_chunk,
                status = excluded.status,
                checkpoint_data = excluded.checkpoint_data,
                error_message = excluded.error_message,
                updated_at = excluded.updated_at",
        )
        .bind(&checkpoint.document_id)
        .bind(checkpoint.batch_id.to_string())
        .bind(checkpoint.total_chunks as i64)
        .bind(checkpoint.last_processed_chunk as i64)
        .bind(checkpoint.status.as_str())
        .bind(data)
        .bind(&checkpoint.error_message)
        .bind(timestamp(&checkpoint.created_at))
        .bind(timestamp(&checkpoint.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn load_checkpoint(&self, document_id: &str, batch_id: BatchId) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints WHERE document_id = ? AND batch_id = ?"
        ))
        .bind(document_id)
        .bind(batch_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    async fn latest_checkpoint(&self, document_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints WHERE document_id = ?
            ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    async fn list_checkpoints(&self, document_id: Option<&str>) -> Result<Vec<Checkpoint>> {
        let rows = match document_id {
            Some(id) => sqlx::query(&format!(
                "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints WHERE document_id = ?
                ORDER BY created_at DESC, rowid DESC"
            ))
            .bind(id)
            .fetch_all(&self.pool)
            .await,
            None => sqlx::query(&format!(
                "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints ORDER BY created_at DESC, rowid DESC"
            ))
            .fetch_all(&self.pool)
            .await,
        }
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_checkpoint).collect()
    }
}

#[async_trait]
impl AuditStore for SqliteStorage {
    async fn record_denial(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO access_denials (id, occurred_at, tenant_id, entity_id, match_id, namespace, reason)
            VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(timestamp(&record.occurred_at))
        .bind(&record.tenant_id)
        .bind(&record.entity_id)
        .bind(&record.match_id)
        .bind(&record.namespace)
        .bind(&record.reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn list_denials(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query(
            "SELECT id, occurred_at, tenant_id, entity_id, match_id, namespace, reason
            FROM access_denials ORDER BY occurred_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_audit).collect()
    }
}
