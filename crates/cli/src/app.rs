//! Wiring from configuration to running components.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tenantrag_cache::{CacheLayer, CacheTtls, MemoryCacheBackend, SqliteCacheBackend};
use tenantrag_core::{api_key_from_env, AppConfig, CacheBackendKind};
use tenantrag_embedding::{
    HybridEmbeddingService, OpenAiEmbeddingClient, RateLimitConfig, RateLimiter, SparseEncoder,
};
use tenantrag_ingest::{SourceDocument, StreamingIngestionProcessor};
use tenantrag_retrieval::{
    AccessController, ContextAssembler, HttpRerankClient, KeywordIntentClassifier, RerankFusion,
    RetrievalOrchestrator,
};
use tenantrag_storage::{InMemoryVectorStore, PineconeVectorStore, SqliteStorage, VectorStore};
use tracing::{info, warn};

/// Components shared by every command.
pub struct App {
    /// Loaded configuration
    pub config: AppConfig,

    /// Checkpoints and the denial audit trail
    pub storage: Arc<SqliteStorage>,

    /// Vector index
    pub store: Arc<dyn VectorStore>,

    pub cache: Arc<CacheLayer>,
}

impl App {
    /// Open the stores named by `config`.
    pub async fn open(config: AppConfig) -> Result<Self> {
        let storage = SqliteStorage::new(&config.storage.database_url)
            .await
            .with_context(|| format!("failed to open {}", config.storage.database_url))?;
        let store = vector_store(&config)?;
        let cache = Arc::new(cache_layer(&config));

        Ok(Self {
            config,
            storage: Arc::new(storage),
            store,
            cache,
        })
    }

    /// Embedding service with the configured provider, limiter and cache.
    pub fn embeddings(&self) -> Result<Arc<HybridEmbeddingService>> {
        let config = &self.config.embedding;
        let api_key = api_key_from_env(&config.api_key_env)?;
        let provider = OpenAiEmbeddingClient::new(config, api_key, self.config.retry.clone());
        let limiter = RateLimiter::new(RateLimitConfig::from(config));

        Ok(Arc::new(HybridEmbeddingService::new(
            Arc::new(provider),
            self.cache.clone(),
            Arc::new(limiter),
            SparseEncoder::new(config.sparse_top_n),
        )))
    }

    /// Ingestion processor writing checkpoints to the sqlite store.
    pub fn processor(&self) -> Result<StreamingIngestionProcessor> {
        let processor = StreamingIngestionProcessor::new(
            self.embeddings()?,
            self.store.clone(),
            self.storage.clone(),
            self.config.ingestion.clone(),
            self.config.namespaces.clone(),
        )?
        .with_price_per_1k_tokens(self.config.embedding.price_per_1k_tokens)
        .with_cache(self.cache.clone());
        Ok(processor)
    }

    /// Query orchestrator, reranking when a provider is configured.
    pub fn orchestrator(&self) -> Result<RetrievalOrchestrator> {
        let access = AccessController::new(self.config.namespaces.clone()).with_audit(self.storage.clone());
        let orchestrator = RetrievalOrchestrator::new(
            Arc::new(KeywordIntentClassifier::new()?),
            self.embeddings()?,
            self.store.clone(),
            Arc::new(access),
            self.cache.clone(),
            self.config.retrieval.clone(),
        );
        Ok(orchestrator.with_rerank(self.rerank()))
    }

    /// Context assembly over the shared cache.
    pub fn context(&self) -> ContextAssembler {
        ContextAssembler::new(self.cache.clone())
    }

    fn rerank(&self) -> RerankFusion {
        let config = &self.config.rerank;
        if !config.enabled {
            return RerankFusion::disabled();
        }
        match api_key_from_env(&config.api_key_env) {
            Ok(key) => RerankFusion::new(Arc::new(HttpRerankClient::new(config, key, self.config.retry.clone()))),
            Err(e) => {
                warn!(error = %e, "Rerank disabled");
                RerankFusion::disabled()
            }
        }
    }
}

fn vector_store(config: &AppConfig) -> Result<Arc<dyn VectorStore>> {
    let settings = &config.vector_store;
    if settings.base_url.is_empty() {
        warn!("No vector index configured, using a process-local index");
        return Ok(Arc::new(InMemoryVectorStore::new()));
    }
    let api_key = api_key_from_env(&settings.api_key_env)?;
    info!(index = %settings.index_name, host = %settings.base_url, "Using hosted vector index");
    Ok(Arc::new(PineconeVectorStore::new(
        settings.base_url.clone(),
        api_key,
        config.retry.clone(),
    )))
}

fn cache_layer(config: &AppConfig) -> CacheLayer {
    let settings = &config.cache;
    if !settings.enabled {
        return CacheLayer::disabled();
    }
    let ttls = CacheTtls::from(settings);
    match settings.backend {
        CacheBackendKind::Memory => CacheLayer::new(Arc::new(MemoryCacheBackend::new()), ttls),
        CacheBackendKind::Sqlite => CacheLayer::new(Arc::new(SqliteCacheBackend::new(settings.sqlite_url.clone())), ttls),
    }
}

/// Read documents from a JSON array or a JSON-lines file.
pub fn load_documents(path: &Path) -> Result<Vec<SourceDocument>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_documents(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn parse_documents(raw: &str) -> Result<Vec<SourceDocument>> {
    if raw.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(raw)?);
    }
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| serde_json::from_str(line).with_context(|| format!("line {}", n + 1)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tenantrag_core::ProcessingMode;

    #[test]
    fn test_parse_json_array() {
        let raw = r#"[
            {"id": "s1", "content": "pay", "mode": "entity_records", "tenant_id": "hof", "owner_id": "1001"},
            {"id": "faq", "content": "faq", "mode": "public_reference"}
        ]"#;
        let docs = parse_documents(raw).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].owner_id.as_deref(), Some("1001"));
        assert_eq!(docs[1].mode, ProcessingMode::PublicReference);
        assert_eq!(docs[1].doc_type, "document");
    }

    #[test]
    fn test_parse_json_lines_reports_line() {
        let raw = "{\"id\": \"a\", \"content\": \"x\", \"mode\": \"public_reference\"}\n\n{\"id\": \"b\"}\n";
        let err = parse_documents(raw).unwrap_err();
        assert!(format!("{err:#}").contains("line 3"));
    }

    #[test]
    fn test_load_documents_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "{{\"id\": \"rules\", \"content\": \"rules\", \"mode\": \"tenant_reference\", \"tenant_id\": \"hof\", \"clearance\": \"standard\"}}"
        )
        .unwrap();
        let docs = load_documents(file.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].tenant_id.as_deref(), Some("hof"));
    }

    #[tokio::test]
    async fn test_cache_follows_config() {
        let mut config = AppConfig::default();
        config.cache.query_ttl_secs = 60;
        let cache = cache_layer(&config);
        assert_eq!(cache.ttls(), CacheTtls::from(&config.cache));
        assert!(cache.is_available().await);

        config.cache.enabled = false;
        assert!(!cache_layer(&config).is_available().await);
    }
}
