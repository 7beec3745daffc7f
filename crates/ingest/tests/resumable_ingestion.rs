//! Checkpointed ingestion against in-memory collaborators.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tenantrag_cache::{CacheLayer, CacheTtls, MemoryCacheBackend};
use tenantrag_core::{
    keys, vector_id, BatchId, Checkpoint, CheckpointData, CheckpointStatus, ClearanceTier, IngestionConfig,
    NamespacePrefixes, RagError, Result, SearchMatch, VectorQuery,
};
use tenantrag_embedding::{EmbeddingProvider, HybridEmbeddingService, RateLimiter, SparseEncoder};
use tenantrag_ingest::{PauseHandle, SourceDocument, StreamingIngestionProcessor};
use tenantrag_storage::{
    CheckpointStore, IndexStats, InMemoryVectorStore, MemoryStorage, VectorRecord, VectorStore,
};

/// Records every text it embeds.
#[derive(Default)]
struct Recording {
    texts: Mutex<Vec<String>>,
}

impl Recording {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.texts.lock().unwrap())
    }
}

#[async_trait]
impl EmbeddingProvider for Recording {
    fn model_name(&self) -> &str {
        "recording"
    }

    fn dimension(&self) -> usize {
        2
    }

    fn max_batch_size(&self) -> usize {
        64
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.texts.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }
}

/// Vector store with injectable failures, latency and a pause trigger.
#[derive(Default)]
struct Scripted {
    inner: InMemoryVectorStore,
    fail_on_chunk: Mutex<Option<usize>>,
    fail_large_once: Mutex<Option<usize>>,
    pause_on_chunk: Mutex<Option<(usize, PauseHandle)>>,
    latency: Duration,
    sizes: Mutex<Vec<usize>>,
}

impl Scripted {
    fn sizes(&self) -> Vec<usize> {
        self.sizes.lock().unwrap().clone()
    }
}

fn chunk_index(record: &VectorRecord) -> usize {
    record
        .metadata
        .get(keys::CHUNK_INDEX)
        .and_then(|v| v.as_f64())
        .map(|n| n as usize)
        .unwrap_or(usize::MAX)
}

#[async_trait]
impl VectorStore for Scripted {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<usize> {
        self.sizes.lock().unwrap().push(records.len());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        {
            let mut once = self.fail_large_once.lock().unwrap();
            if let Some(limit) = *once {
                if records.len() > limit {
                    *once = None;
                    return Err(RagError::transient("vector-store", format!("payload over {limit} rejected")));
                }
            }
        }
        if let Some(bad) = *self.fail_on_chunk.lock().unwrap() {
            if records.iter().any(|r| chunk_index(r) == bad) {
                return Err(RagError::transient("vector-store", "503 service unavailable"));
            }
        }
        if let Some((trigger, handle)) = &*self.pause_on_chunk.lock().unwrap() {
            if records.iter().any(|r| chunk_index(r) == *trigger) {
                handle.pause();
            }
        }

        self.inner.upsert(namespace, records).await
    }

    async fn query(&self, namespace: &str, query: &VectorQuery) -> Result<Vec<SearchMatch>> {
        self.inner.query(namespace, query).await
    }

    async fn describe_stats(&self) -> Result<IndexStats> {
        self.inner.describe_stats().await
    }
}

const NAMESPACE: &str = "employee_1001";

/// One hundred 10-character chunks: `chunk0000 ` .. `chunk0099 `.
fn statement(id: &str) -> SourceDocument {
    let content: String = (0..100).map(|i| format!("chunk{i:04} ")).collect();
    SourceDocument::entity_record(id, "hof", "1001", content).with_doc_type("pay_statement")
}

fn fixed_batches(size: usize) -> IngestionConfig {
    IngestionConfig {
        chunk_size: 10,
        chunk_overlap: 0,
        batch_min: size,
        batch_initial: size,
        batch_max: size,
        checkpoint_interval: size,
        ..Default::default()
    }
}

struct Harness {
    provider: Arc<Recording>,
    store: Arc<Scripted>,
    checkpoints: Arc<MemoryStorage>,
    processor: StreamingIngestionProcessor,
}

fn harness(store: Scripted, config: IngestionConfig) -> Harness {
    let provider = Arc::new(Recording::default());
    let store = Arc::new(store);
    let checkpoints = Arc::new(MemoryStorage::new());
    let embeddings = Arc::new(HybridEmbeddingService::new(
        provider.clone(),
        Arc::new(CacheLayer::disabled()),
        Arc::new(RateLimiter::unlimited()),
        SparseEncoder::default(),
    ));
    let processor = StreamingIngestionProcessor::new(
        embeddings,
        store.clone(),
        checkpoints.clone(),
        config,
        NamespacePrefixes::default(),
    )
    .unwrap()
    .with_price_per_1k_tokens(0.00013);

    Harness {
        provider,
        store,
        checkpoints,
        processor,
    }
}

fn text_index(text: &str) -> usize {
    text.trim().trim_start_matches("chunk").parse().unwrap()
}

#[tokio::test]
async fn test_interrupted_run_resumes_without_gaps_or_rework() {
    let h = harness(Scripted::default(), fixed_batches(10));
    *h.store.fail_on_chunk.lock().unwrap() = Some(47);
    let doc = statement("stmt-2024-05");

    let err = h.processor.process(&doc).await.unwrap_err();
    assert!(err.is_retryable());

    let failed = h.checkpoints.latest_checkpoint(&doc.id).await.unwrap().unwrap();
    assert_eq!(failed.status, CheckpointStatus::Failed);
    assert_eq!(failed.last_processed_chunk, 40);
    assert!(failed.error_message.is_some());
    assert_eq!(failed.data.last_vector_ids.last().unwrap(), &vector_id(NAMESPACE, &doc.id, 39));

    h.provider.take();
    *h.store.fail_on_chunk.lock().unwrap() = None;

    let report = h.processor.process(&doc).await.unwrap();
    assert_eq!(report.status, CheckpointStatus::Completed);
    assert_eq!(report.batch_id, failed.batch_id);
    assert!(report.resumed);
    assert_eq!(report.processed_chunks, 100);
    assert_eq!(report.vectors_upserted, 60);

    let embedded = h.provider.take();
    assert_eq!(embedded.len(), 60);
    assert!(embedded.iter().all(|t| text_index(t) >= 40));

    let expected: Vec<String> = (0..100).map(|i| vector_id(NAMESPACE, &doc.id, i)).collect();
    assert_eq!(h.store.inner.ids(NAMESPACE).await, expected);
    assert_eq!(h.checkpoints.list_checkpoints(Some(&doc.id)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_completed_document_is_not_reprocessed() {
    let h = harness(Scripted::default(), fixed_batches(10));
    let doc = statement("stmt-2024-05");

    let first = h.processor.process(&doc).await.unwrap();
    assert_eq!(first.status, CheckpointStatus::Completed);
    assert_eq!(first.estimated_tokens, 200);
    assert!((first.estimated_cost - 200.0 / 1000.0 * 0.00013).abs() < 1e-12);
    h.provider.take();
    let upserts = h.store.sizes().len();

    let second = h.processor.process(&doc).await.unwrap();
    assert_eq!(second.status, CheckpointStatus::Completed);
    assert_eq!(second.vectors_upserted, 0);
    assert!(h.provider.take().is_empty());
    assert_eq!(h.store.sizes().len(), upserts);
}

#[tokio::test]
async fn test_pause_then_resume_by_batch_id() {
    let h = harness(Scripted::default(), fixed_batches(10));
    *h.store.pause_on_chunk.lock().unwrap() = Some((47, h.processor.pause_handle()));
    let doc = statement("stmt-2024-06");

    let paused = h.processor.process(&doc).await.unwrap();
    assert_eq!(paused.status, CheckpointStatus::Paused);
    assert_eq!(paused.processed_chunks, 50);

    let stored = h
        .checkpoints
        .load_checkpoint(&doc.id, paused.batch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, CheckpointStatus::Paused);
    assert_eq!(stored.last_processed_chunk, 50);

    *h.store.pause_on_chunk.lock().unwrap() = None;
    let done = h.processor.resume(&doc, paused.batch_id).await.unwrap();
    assert_eq!(done.status, CheckpointStatus::Completed);
    assert_eq!(done.vectors_upserted, 50);
    assert_eq!(h.store.inner.ids(NAMESPACE).await.len(), 100);
}

#[tokio::test]
async fn test_changed_content_starts_a_new_run() {
    let h = harness(Scripted::default(), fixed_batches(10));
    let doc = statement("stmt-2024-07");
    let first = h.processor.process(&doc).await.unwrap();

    let mut revised = doc.clone();
    revised.content.push_str("corrected!");
    let second = h.processor.process(&revised).await.unwrap();

    assert_ne!(first.batch_id, second.batch_id);
    assert!(!second.resumed);
    assert_eq!(second.total_chunks, 101);
    assert_eq!(h.checkpoints.list_checkpoints(Some(&doc.id)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_raised_clearance_reindexes_unchanged_text() {
    let h = harness(Scripted::default(), fixed_batches(10));
    let doc = statement("stmt-2024-10");
    let first = h.processor.process(&doc).await.unwrap();
    assert_eq!(first.status, CheckpointStatus::Completed);

    let restricted = doc.clone().with_clearance(ClearanceTier::Advanced);
    let second = h.processor.process(&restricted).await.unwrap();
    assert_ne!(first.batch_id, second.batch_id);
    assert!(!second.resumed);
    assert_eq!(second.vectors_upserted, 100);

    let id = vector_id(NAMESPACE, &doc.id, 0);
    let stored = h.store.inner.get(NAMESPACE, &id).await.unwrap();
    let level = stored.metadata.get(keys::CLEARANCE_LEVEL).and_then(|v| v.as_f64());
    assert_eq!(level, Some(ClearanceTier::Advanced.level() as f64));
}

#[tokio::test]
async fn test_reassigned_owner_starts_a_new_run() {
    let h = harness(Scripted::default(), fixed_batches(10));
    let doc = statement("stmt-2024-11");
    h.processor.process(&doc).await.unwrap();

    let mut reassigned = doc.clone();
    reassigned.owner_id = Some("2002".to_string());
    let report = h.processor.process(&reassigned).await.unwrap();

    assert_eq!(report.status, CheckpointStatus::Completed);
    assert_eq!(report.namespace, "employee_2002");
    assert_eq!(report.vectors_upserted, 100);
    assert_eq!(h.store.inner.ids("employee_2002").await.len(), 100);
    assert_eq!(h.checkpoints.list_checkpoints(Some(&doc.id)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_chunk_count_mismatch_is_corruption() {
    let h = harness(Scripted::default(), fixed_batches(10));
    let doc = statement("stmt-2024-08");

    let mut stale = Checkpoint::new(
        doc.id.clone(),
        5,
        CheckpointData {
            content_hash: doc.fingerprint().unwrap(),
            namespace: NAMESPACE.to_string(),
            ..Default::default()
        },
    );
    stale.transition(CheckpointStatus::InProgress).unwrap();
    stale.fail("crashed").unwrap();
    h.checkpoints.save_checkpoint(&stale).await.unwrap();

    let err = h.processor.process(&doc).await.unwrap_err();
    assert!(matches!(err, RagError::CheckpointCorruption(_)));
}

#[tokio::test]
async fn test_failed_upsert_retried_once_in_halves() {
    let store = Scripted::default();
    *store.fail_large_once.lock().unwrap() = Some(5);
    let h = harness(store, fixed_batches(10));
    let doc = statement("stmt-2024-09");

    let report = h.processor.process(&doc).await.unwrap();
    assert_eq!(report.status, CheckpointStatus::Completed);
    assert_eq!(&h.store.sizes()[..4], &[10, 5, 5, 10]);
    assert_eq!(h.store.inner.ids(NAMESPACE).await.len(), 100);
}

#[tokio::test(start_paused = true)]
async fn test_fast_batches_grow() {
    let config = IngestionConfig {
        batch_min: 5,
        batch_initial: 10,
        batch_max: 40,
        ..fixed_batches(10)
    };
    let h = harness(Scripted::default(), config);
    h.processor.process(&statement("fast")).await.unwrap();
    assert_eq!(&h.store.sizes()[..5], &[10, 15, 23, 35, 17]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_batches_shrink() {
    let store = Scripted {
        latency: Duration::from_secs(6),
        ..Default::default()
    };
    let config = IngestionConfig {
        batch_min: 5,
        batch_initial: 20,
        batch_max: 40,
        ..fixed_batches(10)
    };
    let h = harness(store, config);
    h.processor.process(&statement("slow")).await.unwrap();
    assert_eq!(&h.store.sizes()[..4], &[20, 10, 5, 5]);
}

#[tokio::test]
async fn test_ingest_many_groups_by_owner() {
    let h = harness(Scripted::default(), fixed_batches(10));
    let docs = vec![
        SourceDocument::entity_record("a-1", "hof", "1001", "commission for 1001"),
        SourceDocument::entity_record("b-1", "hof", "2002", "commission for 2002"),
        SourceDocument::entity_record("a-2", "hof", "1001", "clawback for 1001"),
        SourceDocument::tenant_reference("rules", "hof", "settlement rules"),
        SourceDocument::entity_record("orphan", "hof", "", "no owner"),
    ];

    let summary = h.processor.ingest_many(&docs).await;
    assert_eq!(summary.reports.len(), 4);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].0, "orphan");

    let stats = h.store.describe_stats().await.unwrap();
    assert_eq!(stats.namespaces.get("employee_1001"), Some(&4));
    assert_eq!(stats.namespaces.get("employee_2002"), Some(&2));
    assert_eq!(stats.namespaces.get("hof_shared"), Some(&2));

    for id in h.store.inner.ids("employee_2002").await {
        let record = h.store.inner.get("employee_2002", &id).await.unwrap();
        assert_eq!(record.metadata.get(keys::OWNER_ID).and_then(|v| v.as_str()), Some("2002"));
    }
}

/// Checkpoint store that refuses to record failed runs.
struct FailedSaveRejected {
    inner: MemoryStorage,
}

#[async_trait]
impl CheckpointStore for FailedSaveRejected {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> tenantrag_storage::Result<()> {
        if checkpoint.status == CheckpointStatus::Failed {
            return Err(tenantrag_storage::StorageError::Other("database is locked".to_string()));
        }
        self.inner.save_checkpoint(checkpoint).await
    }

    async fn load_checkpoint(&self, document_id: &str, batch_id: BatchId) -> tenantrag_storage::Result<Option<Checkpoint>> {
        self.inner.load_checkpoint(document_id, batch_id).await
    }

    async fn latest_checkpoint(&self, document_id: &str) -> tenantrag_storage::Result<Option<Checkpoint>> {
        self.inner.latest_checkpoint(document_id).await
    }

    async fn list_checkpoints(&self, document_id: Option<&str>) -> tenantrag_storage::Result<Vec<Checkpoint>> {
        self.inner.list_checkpoints(document_id).await
    }
}

fn processor_with(
    store: Arc<Scripted>,
    checkpoints: Arc<dyn CheckpointStore>,
    cache: Arc<CacheLayer>,
) -> StreamingIngestionProcessor {
    let embeddings = Arc::new(HybridEmbeddingService::new(
        Arc::new(Recording::default()),
        Arc::new(CacheLayer::disabled()),
        Arc::new(RateLimiter::unlimited()),
        SparseEncoder::default(),
    ));
    StreamingIngestionProcessor::new(embeddings, store, checkpoints, fixed_batches(10), NamespacePrefixes::default())
        .unwrap()
        .with_cache(cache)
}

#[tokio::test]
async fn test_batch_error_survives_failed_checkpoint_save() {
    let store = Arc::new(Scripted::default());
    *store.fail_on_chunk.lock().unwrap() = Some(47);
    let checkpoints = Arc::new(FailedSaveRejected {
        inner: MemoryStorage::new(),
    });
    let processor = processor_with(store, checkpoints.clone(), Arc::new(CacheLayer::disabled()));
    let doc = statement("stmt-2024-12");

    let err = processor.process(&doc).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(err.to_string().contains("503"));

    let saved = checkpoints.latest_checkpoint(&doc.id).await.unwrap().unwrap();
    assert_eq!(saved.status, CheckpointStatus::InProgress);
    assert_eq!(saved.last_processed_chunk, 40);
}

#[tokio::test]
async fn test_ingestion_invalidates_cached_query_results() {
    let cache = Arc::new(CacheLayer::new(Arc::new(MemoryCacheBackend::new()), CacheTtls::default()));
    cache.put_query_results(NAMESPACE, "q", &[]).await;
    cache.put_query_results("employee_2002", "q", &[]).await;

    let processor = processor_with(Arc::new(Scripted::default()), Arc::new(MemoryStorage::new()), cache.clone());
    processor.process(&statement("stmt-2025-01")).await.unwrap();

    assert!(cache.get_query_results(NAMESPACE, "q").await.is_none());
    assert_eq!(cache.get_query_results("employee_2002", "q").await, Some(vec![]));
}
