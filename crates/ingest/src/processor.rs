//! Checkpointed, resumable streaming ingestion.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tenantrag_cache::CacheLayer;
use tenantrag_core::{
    generate_namespace, vector_id, BatchId, Checkpoint, CheckpointData, CheckpointStatus, Chunk,
    IngestionConfig, NamespaceContext, NamespaceKind, NamespacePrefixes, RagError, Result,
};
use tenantrag_embedding::{estimate_tokens, HybridEmbeddingService};
use tenantrag_storage::{CheckpointStore, VectorRecord, VectorStore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::batch::AdaptiveBatchSizer;
use crate::chunker::{Chunker, ChunkingStrategy};
use crate::document::SourceDocument;

/// Outcome of one document run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionReport {
    /// Document ingested
    pub document_id: String,

    /// Run identifier
    pub batch_id: BatchId,

    /// Namespace written to
    pub namespace: String,

    /// Status at the end of the call
    pub status: CheckpointStatus,

    /// Chunks the document produced
    pub total_chunks: usize,

    /// Chunks committed so far, across resumes
    pub processed_chunks: usize,

    /// Vectors written by this call
    pub vectors_upserted: usize,

    /// Estimated embedding tokens sent by this call
    pub estimated_tokens: u64,

    /// Estimated embedding cost of this call in USD
    pub estimated_cost: f64,

    /// Whether this call continued an earlier run
    pub resumed: bool,
}

/// Result of [`StreamingIngestionProcessor::ingest_many`].
#[derive(Debug, Default)]
pub struct IngestionSummary {
    /// Documents that ran, completed or paused
    pub reports: Vec<IngestionReport>,

    /// Documents that failed, with their error
    pub failures: Vec<(String, RagError)>,
}

impl IngestionSummary {
    /// Vectors written across all documents.
    pub fn vectors_upserted(&self) -> usize {
        self.reports.iter().map(|r| r.vectors_upserted).sum()
    }

    /// Estimated cost across all documents.
    pub fn estimated_cost(&self) -> f64 {
        self.reports.iter().map(|r| r.estimated_cost).sum()
    }
}

/// Requests a cooperative pause of the running ingestion.
#[derive(Debug, Clone, Default)]
pub struct PauseHandle(Arc<AtomicBool>);

impl PauseHandle {
    /// Ask the current run to stop after its in-flight batch.
    pub fn pause(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Chunks, embeds and upserts documents in adaptive batches, persisting a
/// checkpoint every few chunks and at every terminal state.
pub struct StreamingIngestionProcessor {
    embeddings: Arc<HybridEmbeddingService>,
    store: Arc<dyn VectorStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    chunker: Chunker,
    prefixes: NamespacePrefixes,
    config: IngestionConfig,
    price_per_1k_tokens: f64,
    pause: PauseHandle,
    cache: Option<Arc<CacheLayer>>,
}

/// Counters for one call.
#[derive(Default)]
struct RunStats {
    vectors: usize,
    tokens: u64,
}

impl StreamingIngestionProcessor {
    /// Create a processor.
    pub fn new(
        embeddings: Arc<HybridEmbeddingService>,
        store: Arc<dyn VectorStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: IngestionConfig,
        prefixes: NamespacePrefixes,
    ) -> Result<Self> {
        let chunker = Chunker::new(ChunkingStrategy::from_config(&config)?)?;
        Ok(Self {
            embeddings,
            store,
            checkpoints,
            chunker,
            prefixes,
            config,
            price_per_1k_tokens: 0.0,
            pause: PauseHandle::default(),
            cache: None,
        })
    }

    /// Price used for cost estimates, USD per 1000 tokens.
    pub fn with_price_per_1k_tokens(mut self, price: f64) -> Self {
        self.price_per_1k_tokens = price;
        self
    }

    /// Invalidate cached query results of every namespace this processor
    /// writes to.
    pub fn with_cache(mut self, cache: Arc<CacheLayer>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Handle that pauses the running document.
    pub fn pause_handle(&self) -> PauseHandle {
        self.pause.clone()
    }

    /// Pause the running document after its in-flight batch.
    pub fn pause(&self) {
        self.pause.pause();
    }

    /// Ingest `document`, continuing an unfinished run of the same content.
    ///
    /// A completed run of the same content returns immediately. Content
    /// that changed starts a new run.
    pub async fn process(&self, document: &SourceDocument) -> Result<IngestionReport> {
        document.validate()?;
        let namespace = document.namespace(&self.prefixes)?;
        let chunks = self.chunker.chunk(document, &namespace);
        let hash = document.fingerprint()?;

        let existing = self
            .checkpoints
            .latest_checkpoint(&document.id)
            .await?
            .filter(|cp| cp.data.content_hash == hash);

        let (checkpoint, resumed) = match existing {
            Some(cp) => {
                check_consistent(&cp, &namespace, chunks.len())?;
                (cp, true)
            }
            None => {
                let data = CheckpointData {
                    content_hash: hash,
                    namespace: namespace.clone(),
                    last_vector_ids: vec![],
                    batch_size: 0,
                };
                (Checkpoint::new(document.id.clone(), chunks.len(), data), false)
            }
        };

        self.run(document, checkpoint, chunks, resumed).await
    }

    /// Continue the run `batch_id` of `document`.
    ///
    /// The document supplies the content to re-chunk; it must be the same
    /// content the run started with.
    pub async fn resume(&self, document: &SourceDocument, batch_id: BatchId) -> Result<IngestionReport> {
        document.validate()?;
        let checkpoint = self
            .checkpoints
            .load_checkpoint(&document.id, batch_id)
            .await?
            .ok_or_else(|| RagError::invalid_input(format!("no checkpoint {batch_id} for {}", document.id)))?;

        if checkpoint.data.content_hash != document.fingerprint()? {
            return Err(RagError::CheckpointCorruption(format!(
                "content or metadata of {} changed since run {batch_id}",
                document.id
            )));
        }
        let namespace = document.namespace(&self.prefixes)?;
        let chunks = self.chunker.chunk(document, &namespace);
        check_consistent(&checkpoint, &namespace, chunks.len())?;

        self.run(document, checkpoint, chunks, true).await
    }

    /// Ingest many documents, grouped by target namespace.
    ///
    /// Failures are collected per document; the remaining documents still run.
    /// A pause stops the whole call after the paused document.
    pub async fn ingest_many(&self, documents: &[SourceDocument]) -> IngestionSummary {
        let mut summary = IngestionSummary::default();
        let mut groups: BTreeMap<String, Vec<&SourceDocument>> = BTreeMap::new();
        for doc in documents {
            match doc.validate().and_then(|_| doc.namespace(&self.prefixes)) {
                Ok(namespace) => groups.entry(namespace).or_default().push(doc),
                Err(e) => summary.failures.push((doc.id.clone(), e)),
            }
        }

        info!(documents = documents.len(), namespaces = groups.len(), "Starting ingestion");
        'groups: for (namespace, docs) in groups {
            debug!(%namespace, documents = docs.len(), "Ingesting namespace group");
            for doc in docs {
                match self.process(doc).await {
                    Ok(report) if report.status == CheckpointStatus::Paused => {
                        summary.reports.push(report);
                        info!(document = %doc.id, "Paused, remaining documents not started");
                        break 'groups;
                    }
                    Ok(report) => summary.reports.push(report),
                    Err(e) => summary.failures.push((doc.id.clone(), e)),
                }
            }
        }

        info!(
            completed = summary.reports.iter().filter(|r| r.status == CheckpointStatus::Completed).count(),
            failed = summary.failures.len(),
            vectors = summary.vectors_upserted(),
            estimated_cost_usd = summary.estimated_cost(),
            "Ingestion finished"
        );
        summary
    }

    async fn run(
        &self,
        document: &SourceDocument,
        mut checkpoint: Checkpoint,
        chunks: Vec<Chunk>,
        resumed: bool,
    ) -> Result<IngestionReport> {
        let namespace = checkpoint.data.namespace.clone();
        let mut stats = RunStats::default();

        if checkpoint.is_complete() {
            info!(document = %document.id, batch_id = %checkpoint.batch_id, "Already ingested, skipping");
            return Ok(self.report(&checkpoint, &stats, resumed));
        }

        self.pause.clear();
        // A run found in progress was interrupted without a terminal save.
        if checkpoint.status != CheckpointStatus::InProgress {
            checkpoint.transition(CheckpointStatus::InProgress)?;
        }
        self.checkpoints.save_checkpoint(&checkpoint).await?;

        info!(
            document = %document.id,
            batch_id = %checkpoint.batch_id,
            %namespace,
            total = checkpoint.total_chunks,
            from = checkpoint.last_processed_chunk,
            resumed,
            "Ingesting document"
        );

        let mut sizer = AdaptiveBatchSizer::from_config(&self.config).resume_at(checkpoint.data.batch_size);
        let interval = self.config.checkpoint_interval.max(1);
        let mut next = checkpoint.last_processed_chunk;
        let mut unsaved = 0;

        while next < chunks.len() {
            let end = (next + sizer.current()).min(chunks.len());
            let batch = &chunks[next..end];
            let started = Instant::now();

            let outcome = self.commit_batch(document, &namespace, batch, &mut stats).await;
            self.invalidate_queries(&namespace).await;
            let committed = match outcome {
                Ok(ids) => ids,
                Err(e) => {
                    error!(
                        document = %document.id,
                        batch_id = %checkpoint.batch_id,
                        processed = checkpoint.last_processed_chunk,
                        error = %e,
                        "Ingestion failed"
                    );
                    sizer.shrink();
                    checkpoint.data.batch_size = sizer.current();
                    checkpoint.fail(e.to_string())?;
                    if let Err(save_error) = self.checkpoints.save_checkpoint(&checkpoint).await {
                        warn!(
                            batch_id = %checkpoint.batch_id,
                            error = %save_error,
                            "Failed checkpoint not saved"
                        );
                    }
                    return Err(e);
                }
            };

            next = end;
            unsaved += batch.len();
            checkpoint.record_progress(next, committed)?;
            checkpoint.data.batch_size = sizer.record(started.elapsed());

            if unsaved >= interval {
                self.checkpoints.save_checkpoint(&checkpoint).await?;
                unsaved = 0;
            }

            if next < chunks.len() && self.pause.take() {
                checkpoint.transition(CheckpointStatus::Paused)?;
                self.checkpoints.save_checkpoint(&checkpoint).await?;
                info!(
                    document = %document.id,
                    batch_id = %checkpoint.batch_id,
                    processed = next,
                    "Ingestion paused"
                );
                return Ok(self.report(&checkpoint, &stats, resumed));
            }
        }

        checkpoint.transition(CheckpointStatus::Completed)?;
        self.checkpoints.save_checkpoint(&checkpoint).await?;
        self.log_index_stats(&namespace).await;

        let report = self.report(&checkpoint, &stats, resumed);
        info!(
            document = %document.id,
            vectors = report.vectors_upserted,
            estimated_tokens = report.estimated_tokens,
            estimated_cost_usd = report.estimated_cost,
            "Ingestion completed"
        );
        Ok(report)
    }

    async fn invalidate_queries(&self, namespace: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate_namespace(namespace).await;
        }
    }

    /// Embed and upsert one batch; returns the committed vector ids.
    ///
    /// A failed upsert is retried once as two halves before giving up.
    async fn commit_batch(
        &self,
        document: &SourceDocument,
        namespace: &str,
        batch: &[Chunk],
        stats: &mut RunStats,
    ) -> Result<Vec<String>> {
        for chunk in batch {
            verify_ownership(document.namespace_kind(), namespace, chunk, &self.prefixes)?;
        }

        let texts: Vec<String> = batch.iter().map(|c| c.embedding_text.clone()).collect();
        let embedded = self.embeddings.embed_hybrid(&texts).await?;
        stats.tokens += texts.iter().map(|t| estimate_tokens(t)).sum::<u64>();

        let mut records: Vec<VectorRecord> = batch
            .iter()
            .zip(embedded)
            .map(|(chunk, embedding)| VectorRecord {
                id: vector_id(namespace, &chunk.metadata.document_id, chunk.metadata.chunk_index),
                values: embedding.dense,
                sparse: Some(embedding.sparse).filter(|s| !s.is_empty()),
                metadata: chunk.to_metadata(),
            })
            .collect();
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();

        match self.store.upsert(namespace, records.clone()).await {
            Ok(_) => {}
            Err(e) if records.len() > 1 => {
                warn!(%namespace, size = records.len(), error = %e, "Upsert failed, retrying in halves");
                let second = records.split_off(records.len() / 2);
                self.store.upsert(namespace, records).await?;
                self.store.upsert(namespace, second).await?;
            }
            Err(e) => return Err(e),
        }

        stats.vectors += ids.len();
        Ok(ids)
    }

    async fn log_index_stats(&self, namespace: &str) {
        match self.store.describe_stats().await {
            Ok(stats) => info!(
                %namespace,
                namespace_vectors = stats.namespaces.get(namespace).copied().unwrap_or(0),
                total_vectors = stats.total_vector_count,
                namespaces = stats.namespaces.len(),
                "Index stats"
            ),
            Err(e) => warn!(error = %e, "Could not read index stats"),
        }
    }

    fn report(&self, checkpoint: &Checkpoint, stats: &RunStats, resumed: bool) -> IngestionReport {
        IngestionReport {
            document_id: checkpoint.document_id.clone(),
            batch_id: checkpoint.batch_id,
            namespace: checkpoint.data.namespace.clone(),
            status: checkpoint.status,
            total_chunks: checkpoint.total_chunks,
            processed_chunks: checkpoint.last_processed_chunk,
            vectors_upserted: stats.vectors,
            estimated_tokens: stats.tokens,
            estimated_cost: stats.tokens as f64 / 1000.0 * self.price_per_1k_tokens,
            resumed,
        }
    }
}

/// A stored run must describe the same chunking of the same content.
fn check_consistent(checkpoint: &Checkpoint, namespace: &str, total: usize) -> Result<()> {
    if checkpoint.total_chunks != total {
        return Err(RagError::CheckpointCorruption(format!(
            "{} has {total} chunks but run {} recorded {}",
            checkpoint.document_id, checkpoint.batch_id, checkpoint.total_chunks
        )));
    }
    if checkpoint.data.namespace != namespace {
        return Err(RagError::CheckpointCorruption(format!(
            "run {} wrote to {} but {} now targets {namespace}",
            checkpoint.batch_id, checkpoint.data.namespace, checkpoint.document_id
        )));
    }
    Ok(())
}

/// Ownership check run on every chunk before it is embedded or written.
///
/// The namespace rebuilt from the chunk's own metadata must be the target
/// namespace; public chunks may carry no owner.
pub fn verify_ownership(
    kind: NamespaceKind,
    namespace: &str,
    chunk: &Chunk,
    prefixes: &NamespacePrefixes,
) -> Result<()> {
    let meta = &chunk.metadata;
    let violation = |detail: String| {
        error!(
            target: "security",
            document = %meta.document_id,
            chunk = meta.chunk_index,
            %namespace,
            %detail,
            "Ownership violation during ingestion"
        );
        Err(RagError::SecurityViolation(detail))
    };

    if chunk.namespace != namespace {
        return violation(format!("chunk targets {} instead of {namespace}", chunk.namespace));
    }
    if kind == NamespaceKind::Public && meta.owner_id.is_some() {
        return violation("public chunk carries an owner".to_string());
    }

    let context = NamespaceContext {
        tenant_id: meta.tenant_id.clone(),
        entity_id: meta.owner_id.clone(),
    };
    match generate_namespace(kind, &context, prefixes) {
        Ok(expected) if expected == namespace => Ok(()),
        Ok(expected) => violation(format!(
            "chunk owned for {expected} cannot be written to {namespace}"
        )),
        Err(e) => violation(format!("chunk ownership incomplete: {e}")),
    }
}
