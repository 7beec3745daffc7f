//! End-to-end query pipeline tests over in-memory collaborators.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tenantrag_cache::CacheLayer;
use tenantrag_core::{
    keys, AuthContext, ClearanceTier, Metadata, MetadataFilter, NamespacePrefixes, QueryIntent,
    RagError, Result, RetrievalConfig, SearchMatch, VectorQuery,
};
use tenantrag_embedding::{EmbeddingProvider, HybridEmbeddingService, RateLimiter, SparseEncoder};
use tenantrag_retrieval::{
    AccessController, ClassifiedQuery, IntentClassifier, QueryOutcome, RerankFusion,
    RerankProvider, RerankScore, RetrievalOrchestrator,
};
use tenantrag_storage::{IndexStats, InMemoryVectorStore, VectorRecord, VectorStore};

/// Every text embeds to the same unit vector, so stored vectors set the score.
struct UnitEmbedder;

#[async_trait]
impl EmbeddingProvider for UnitEmbedder {
    fn model_name(&self) -> &str {
        "unit"
    }

    fn dimension(&self) -> usize {
        2
    }

    fn max_batch_size(&self) -> usize {
        16
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

/// Classifier returning a fixed answer.
struct Fixed(QueryIntent, Option<MetadataFilter>);

impl IntentClassifier for Fixed {
    fn classify(&self, _text: &str) -> ClassifiedQuery {
        ClassifiedQuery {
            intent: self.0,
            filter: self.1.clone(),
        }
    }
}

/// Counts queries and records the namespaces asked for.
struct Counting {
    inner: InMemoryVectorStore,
    queries: AtomicUsize,
    namespaces: Mutex<Vec<String>>,
}

impl Counting {
    fn new(inner: InMemoryVectorStore) -> Self {
        Self {
            inner,
            queries: AtomicUsize::new(0),
            namespaces: Mutex::new(vec![]),
        }
    }

    fn count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for Counting {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<usize> {
        self.inner.upsert(namespace, records).await
    }

    async fn query(&self, namespace: &str, query: &VectorQuery) -> Result<Vec<SearchMatch>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.namespaces.lock().unwrap().push(namespace.to_string());
        self.inner.query(namespace, query).await
    }

    async fn describe_stats(&self) -> Result<IndexStats> {
        self.inner.describe_stats().await
    }
}

/// A misconfigured index: ignores filters and namespaces, returns everything.
struct Leaky {
    inner: InMemoryVectorStore,
    all_namespaces: Vec<String>,
}

#[async_trait]
impl VectorStore for Leaky {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<usize> {
        self.inner.upsert(namespace, records).await
    }

    async fn query(&self, _namespace: &str, query: &VectorQuery) -> Result<Vec<SearchMatch>> {
        let unfiltered = VectorQuery {
            filter: None,
            top_k: 1000,
            ..query.clone()
        };
        let mut out = Vec::new();
        for ns in &self.all_namespaces {
            out.extend(self.inner.query(ns, &unfiltered).await?);
        }
        Ok(out)
    }

    async fn describe_stats(&self) -> Result<IndexStats> {
        self.inner.describe_stats().await
    }
}

struct DownReranker;

#[async_trait]
impl RerankProvider for DownReranker {
    fn max_candidates(&self) -> usize {
        100
    }

    async fn rerank(&self, _query: &str, _documents: &[String]) -> Result<Vec<RerankScore>> {
        Err(RagError::transient("rerank", "503 service unavailable"))
    }
}

fn caller() -> AuthContext {
    AuthContext::for_entity("hof", "1001", ClearanceTier::Standard)
}

/// Stored vector whose cosine with the query vector is `cos`.
fn record(id: &str, cos: f32, fields: &[(&str, &str)], clearance: f64) -> VectorRecord {
    let mut metadata: Metadata = fields
        .iter()
        .map(|(k, v)| (k.to_string(), (*v).into()))
        .collect();
    metadata.insert(keys::CLEARANCE_LEVEL.to_string(), clearance.into());
    metadata.insert(keys::TEXT.to_string(), format!("text of {id}").into());
    VectorRecord {
        id: id.to_string(),
        values: vec![cos, (1.0 - cos * cos).sqrt()],
        sparse: None,
        metadata,
    }
}

async fn seeded_store() -> InMemoryVectorStore {
    let store = InMemoryVectorStore::new();
    store
        .upsert(
            "employee_1001",
            vec![record("own", 0.85, &[(keys::OWNER_ID, "1001"), (keys::TENANT_ID, "hof")], 1.0)],
        )
        .await
        .unwrap();
    store
        .upsert(
            "hof_shared",
            vec![record("rule", 0.90, &[(keys::TENANT_ID, "hof")], 1.0)],
        )
        .await
        .unwrap();
    store
        .upsert("public", vec![record("faq", 0.92, &[], 1.0)])
        .await
        .unwrap();
    store
}

fn orchestrator(
    classifier: Fixed,
    store: Arc<dyn VectorStore>,
    cache: Arc<CacheLayer>,
    config: RetrievalConfig,
) -> RetrievalOrchestrator {
    let embeddings = Arc::new(HybridEmbeddingService::new(
        Arc::new(UnitEmbedder),
        cache.clone(),
        Arc::new(RateLimiter::unlimited()),
        SparseEncoder::default(),
    ));
    RetrievalOrchestrator::new(
        Arc::new(classifier),
        embeddings,
        store,
        Arc::new(AccessController::new(NamespacePrefixes::default())),
        cache,
        config,
    )
}

fn answered(outcome: QueryOutcome) -> Vec<SearchMatch> {
    match outcome {
        QueryOutcome::Answered { matches } => matches,
        other => panic!("expected answered, got {other:?}"),
    }
}

fn ids(matches: &[SearchMatch]) -> Vec<&str> {
    matches.iter().map(|m| m.id.as_str()).collect()
}

#[tokio::test]
async fn test_namespace_weights_decide_the_order() {
    let store = Arc::new(seeded_store().await);
    let orch = orchestrator(
        Fixed(QueryIntent::Mixed, None),
        store,
        Arc::new(CacheLayer::disabled()),
        RetrievalConfig::default(),
    );

    let matches = answered(orch.query("내 수수료", &caller()).await.unwrap());
    assert_eq!(ids(&matches), vec!["own", "rule", "faq"]);

    let weighted: Vec<f32> = matches.iter().map(|m| m.weighted_score).collect();
    assert!((weighted[0] - 1.275).abs() < 1e-3);
    assert!((weighted[1] - 0.90).abs() < 1e-3);
    assert!((weighted[2] - 0.644).abs() < 1e-3);
}

#[tokio::test]
async fn test_structured_filter_falls_back_exactly_once() {
    let store = Arc::new(Counting::new(seeded_store().await));
    let filter = MetadataFilter::new().equals("period", "2099-01");
    let orch = orchestrator(
        Fixed(QueryIntent::PolicyLookup, Some(filter.clone())),
        store.clone(),
        Arc::new(CacheLayer::disabled()),
        RetrievalConfig::default(),
    );

    let response = orch.query_with_diagnostics("규정", &caller()).await.unwrap();
    assert!(response.diagnostics.fallback_used);
    assert_eq!(ids(&answered(response.outcome)), vec!["rule", "faq"]);
    // Two namespaces, two passes.
    assert_eq!(store.count(), 4);

    let empty = Arc::new(Counting::new(InMemoryVectorStore::new()));
    let orch = orchestrator(
        Fixed(QueryIntent::PolicyLookup, Some(filter)),
        empty.clone(),
        Arc::new(CacheLayer::disabled()),
        RetrievalConfig::default(),
    );
    let outcome = orch.query("규정", &caller()).await.unwrap();
    assert_eq!(outcome, QueryOutcome::NoResults);
    assert_eq!(empty.count(), 4);
}

#[tokio::test]
async fn test_no_fallback_without_structured_filter() {
    let empty = Arc::new(Counting::new(InMemoryVectorStore::new()));
    let orch = orchestrator(
        Fixed(QueryIntent::PolicyLookup, None),
        empty.clone(),
        Arc::new(CacheLayer::disabled()),
        RetrievalConfig::default(),
    );
    let response = orch.query_with_diagnostics("규정", &caller()).await.unwrap();
    assert_eq!(response.outcome, QueryOutcome::NoResults);
    assert!(!response.diagnostics.fallback_used);
    assert_eq!(empty.count(), 2);
}

#[tokio::test]
async fn test_misconfigured_index_cannot_leak_other_tenants() {
    let inner = seeded_store().await;
    inner
        .upsert(
            "employee_2002",
            vec![record("other-entity", 0.99, &[(keys::OWNER_ID, "2002"), (keys::TENANT_ID, "hof")], 1.0)],
        )
        .await
        .unwrap();
    inner
        .upsert(
            "acme_shared",
            vec![record("other-tenant", 0.99, &[(keys::TENANT_ID, "acme")], 1.0)],
        )
        .await
        .unwrap();
    // Misrouted: another entity's chunk inside the caller's namespace.
    inner
        .upsert(
            "employee_1001",
            vec![record("misrouted", 0.98, &[(keys::OWNER_ID, "2002"), (keys::TENANT_ID, "hof")], 1.0)],
        )
        .await
        .unwrap();
    // Above the caller's clearance.
    inner
        .upsert("hof_shared", vec![record("secret", 0.97, &[(keys::TENANT_ID, "hof")], 3.0)])
        .await
        .unwrap();

    let leaky = Arc::new(Leaky {
        inner,
        all_namespaces: ["employee_1001", "employee_2002", "hof_shared", "acme_shared", "public"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    });
    let orch = orchestrator(
        Fixed(QueryIntent::Mixed, None),
        leaky,
        Arc::new(CacheLayer::disabled()),
        RetrievalConfig {
            top_k: 50,
            ..Default::default()
        },
    );

    let response = orch.query_with_diagnostics("anything", &caller()).await.unwrap();
    assert!(response.diagnostics.denied > 0);

    let matches = answered(response.outcome);
    for m in &matches {
        assert!(
            ["own", "rule", "faq"].contains(&m.id.as_str()),
            "leaked {} from {}",
            m.id,
            m.namespace
        );
    }
}

#[tokio::test]
async fn test_rerank_outage_still_returns_ordered_results() {
    let store = Arc::new(seeded_store().await);
    let orch = orchestrator(
        Fixed(QueryIntent::Mixed, None),
        store,
        Arc::new(CacheLayer::disabled()),
        RetrievalConfig::default(),
    )
    .with_rerank(RerankFusion::new(Arc::new(DownReranker)));

    let response = orch.query_with_diagnostics("query", &caller()).await.unwrap();
    assert!(response.diagnostics.reranked);

    let matches = answered(response.outcome);
    assert_eq!(ids(&matches), vec!["own", "rule", "faq"]);
    let scores: Vec<f32> = matches.iter().map(|m| m.rerank.as_ref().unwrap().score).collect();
    assert!(scores.windows(2).all(|w| w[0] > w[1]));
}

#[tokio::test]
async fn test_cache_changes_latency_not_results() {
    let store = Arc::new(Counting::new(seeded_store().await));
    let cache = Arc::new(CacheLayer::in_memory());
    let cached = orchestrator(
        Fixed(QueryIntent::Mixed, None),
        store.clone(),
        cache,
        RetrievalConfig::default(),
    );

    let cold = cached.query("질문", &caller()).await.unwrap();
    let after_cold = store.count();
    let warm = cached.query("질문", &caller()).await.unwrap();
    assert_eq!(cold, warm);
    assert_eq!(store.count(), after_cold);

    let uncached = orchestrator(
        Fixed(QueryIntent::Mixed, None),
        store.clone(),
        Arc::new(CacheLayer::disabled()),
        RetrievalConfig::default(),
    );
    assert_eq!(uncached.query("질문", &caller()).await.unwrap(), cold);
}

#[tokio::test]
async fn test_weak_matches_are_low_relevance() {
    let store = InMemoryVectorStore::new();
    store
        .upsert("public", vec![record("weak", 0.2, &[], 1.0)])
        .await
        .unwrap();
    let orch = orchestrator(
        Fixed(QueryIntent::GeneralKnowledge, None),
        Arc::new(store),
        Arc::new(CacheLayer::disabled()),
        RetrievalConfig::default(),
    );

    match orch.query("보험", &caller()).await.unwrap() {
        QueryOutcome::LowRelevance { best_score, threshold } => {
            assert!((best_score - 0.2).abs() < 1e-3);
            assert_eq!(threshold, 0.3);
        }
        other => panic!("expected low relevance, got {other:?}"),
    }
}

#[tokio::test]
async fn test_personal_query_needs_an_entity() {
    let orch = orchestrator(
        Fixed(QueryIntent::PersonalRecords, None),
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(CacheLayer::disabled()),
        RetrievalConfig::default(),
    );
    let tenant_only = AuthContext {
        tenant_id: "hof".into(),
        entity_id: None,
        clearance: ClearanceTier::Basic,
    };
    let err = orch.query("내 급여", &tenant_only).await.unwrap_err();
    assert!(matches!(err, RagError::Configuration(_)));
}

#[tokio::test]
async fn test_sequential_search_stops_once_enough_found() {
    let store = Arc::new(Counting::new(seeded_store().await));
    let orch = orchestrator(
        Fixed(QueryIntent::PersonalRecords, None),
        store.clone(),
        Arc::new(CacheLayer::disabled()),
        RetrievalConfig {
            top_k: 1,
            ..Default::default()
        },
    );

    let matches = answered(orch.query("내 급여", &caller()).await.unwrap());
    assert_eq!(ids(&matches), vec!["own"]);
    assert_eq!(*store.namespaces.lock().unwrap(), vec!["employee_1001".to_string()]);
}

#[tokio::test]
async fn test_empty_query_is_invalid_input() {
    let orch = orchestrator(
        Fixed(QueryIntent::Mixed, None),
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(CacheLayer::disabled()),
        RetrievalConfig::default(),
    );
    let err = orch.query("   ", &caller()).await.unwrap_err();
    assert!(matches!(err, RagError::InvalidInput(_)));
}
