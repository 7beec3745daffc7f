//! Query pipeline: intent, namespaces, fan-out, access control, rerank.

use futures::future::try_join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tenantrag_cache::{query_fingerprint, CacheLayer};
use tenantrag_core::{
    get_strategy, sort_by_weighted_score, AuthContext, NamespaceTarget, QueryIntent, RagError,
    Result, RetrievalConfig, SearchMatch, SearchMode, SearchQuery, StrategyRequest, VectorQuery,
};
use tenantrag_embedding::HybridEmbeddingService;
use tenantrag_storage::VectorStore;
use tracing::{debug, info};

use crate::access::AccessController;
use crate::classifier::IntentClassifier;
use crate::rerank::RerankFusion;

/// Result of a query. Low relevance is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QueryOutcome {
    /// Matches good enough to answer from, best first
    Answered {
        /// Surviving matches
        matches: Vec<SearchMatch>,
    },

    /// Matches exist but the best is below the threshold; ask the caller
    /// to be more specific
    LowRelevance {
        /// Relevance of the best match
        best_score: f32,

        /// Threshold in effect
        threshold: f32,
    },

    /// Nothing the caller may see matched
    NoResults,
}

/// How a query was executed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryDiagnostics {
    /// Classified intent
    pub intent: QueryIntent,

    /// Fan-out mode of the selected strategy
    pub mode: SearchMode,

    /// Namespaces searched, in priority order
    pub namespaces: Vec<String>,

    /// Whether the structured filter was dropped for a second attempt
    pub fallback_used: bool,

    /// Merged candidates before access control
    pub candidates: usize,

    /// Candidates dropped by post-hoc validation
    pub denied: usize,

    /// Whether a rerank provider was applied
    pub reranked: bool,
}

/// Outcome plus diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    /// Query outcome
    pub outcome: QueryOutcome,

    /// Execution details
    pub diagnostics: QueryDiagnostics,
}

/// Runs the query pipeline for one caller at a time.
pub struct RetrievalOrchestrator {
    classifier: Arc<dyn IntentClassifier>,
    embeddings: Arc<HybridEmbeddingService>,
    store: Arc<dyn VectorStore>,
    access: Arc<AccessController>,
    cache: Arc<CacheLayer>,
    rerank: RerankFusion,
    config: RetrievalConfig,
}

impl RetrievalOrchestrator {
    /// Create an orchestrator without reranking.
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        embeddings: Arc<HybridEmbeddingService>,
        store: Arc<dyn VectorStore>,
        access: Arc<AccessController>,
        cache: Arc<CacheLayer>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            classifier,
            embeddings,
            store,
            access,
            cache,
            rerank: RerankFusion::disabled(),
            config,
        }
    }

    /// Rerank merged candidates with `rerank`.
    pub fn with_rerank(mut self, rerank: RerankFusion) -> Self {
        self.rerank = rerank;
        self
    }

    /// Answer `text` for `auth`.
    pub async fn query(&self, text: &str, auth: &AuthContext) -> Result<QueryOutcome> {
        Ok(self.query_with_diagnostics(text, auth).await?.outcome)
    }

    /// Answer `text` for `auth`, reporting how the query ran.
    pub async fn query_with_diagnostics(&self, text: &str, auth: &AuthContext) -> Result<QueryResponse> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RagError::invalid_input("empty query"));
        }
        if self.config.top_k == 0 {
            return Err(RagError::config("retrieval.top_k must be at least 1"));
        }

        let classified = self.classifier.classify(text);
        let strategy = get_strategy(StrategyRequest::Query(classified.intent));
        let strict = classified.intent == QueryIntent::PersonalRecords;
        let targets = self.access.partition_targets(&strategy, auth, strict)?;

        let embedding = self.embeddings.embed_query(text).await?;
        let mut search = SearchQuery {
            vector: embedding.dense,
            sparse: Some(embedding.sparse).filter(|s| !s.is_empty()),
            filter: classified.filter.filter(|f| !f.is_empty()),
            top_k: self.config.top_k,
            targets,
            mode: strategy.mode,
        };

        let mut candidates = self.fan_out(text, &search, auth).await?;
        let mut fallback_used = false;
        if candidates.is_empty() && search.filter.is_some() {
            info!(intent = %classified.intent, "No matches under structured filter, retrying without it");
            search.filter = None;
            candidates = self.fan_out(text, &search, auth).await?;
            fallback_used = true;
        }

        let candidate_count = candidates.len();
        let (allowed, denied) = self.access.enforce(candidates, &search.targets, auth).await;

        let reranked = self.rerank.is_enabled() && !allowed.is_empty();
        let mut matches = if reranked {
            self.rerank.rerank(text, allowed).await
        } else {
            allowed
        };
        matches.truncate(self.config.top_k);

        let threshold = self.config.relevance_threshold;
        let outcome = if matches.is_empty() {
            QueryOutcome::NoResults
        } else {
            let best_score = matches
                .iter()
                .map(SearchMatch::relevance)
                .fold(f32::NEG_INFINITY, f32::max);
            if best_score < threshold {
                QueryOutcome::LowRelevance {
                    best_score,
                    threshold,
                }
            } else {
                QueryOutcome::Answered { matches }
            }
        };

        let diagnostics = QueryDiagnostics {
            intent: classified.intent,
            mode: search.mode,
            namespaces: search.targets.iter().map(|t| t.namespace.clone()).collect(),
            fallback_used,
            candidates: candidate_count,
            denied,
            reranked,
        };

        info!(
            intent = %diagnostics.intent,
            namespaces = ?diagnostics.namespaces,
            candidates = diagnostics.candidates,
            denied = diagnostics.denied,
            fallback_used = diagnostics.fallback_used,
            reranked = diagnostics.reranked,
            "Query completed"
        );

        Ok(QueryResponse {
            outcome,
            diagnostics,
        })
    }

    /// Search every target and merge by weighted score, one entry per
    /// `(namespace, id)`.
    async fn fan_out(&self, text: &str, search: &SearchQuery, auth: &AuthContext) -> Result<Vec<SearchMatch>> {
        let depth = search.top_k * self.config.candidate_multiplier.max(1);
        let mut merged: Vec<SearchMatch> = Vec::new();

        match search.mode {
            SearchMode::Parallel => {
                let searches = search
                    .targets
                    .iter()
                    .map(|target| self.search_namespace(text, search, target, depth, auth));
                for found in try_join_all(searches).await? {
                    merged.extend(found);
                }
            }
            SearchMode::Sequential => {
                for target in &search.targets {
                    merged.extend(self.search_namespace(text, search, target, depth, auth).await?);
                    if merged.len() >= search.top_k {
                        debug!(namespace = %target.namespace, found = merged.len(), "Enough matches, stopping");
                        break;
                    }
                }
            }
        }

        sort_by_weighted_score(&mut merged);
        let mut seen = HashSet::new();
        merged.retain(|m| seen.insert((m.namespace.clone(), m.id.clone())));
        Ok(merged)
    }

    /// Query one namespace under its security filter, through the query cache.
    async fn search_namespace(
        &self,
        text: &str,
        search: &SearchQuery,
        target: &NamespaceTarget,
        depth: usize,
        auth: &AuthContext,
    ) -> Result<Vec<SearchMatch>> {
        let security = self.access.security_filter(target.kind, auth);
        let filter = match &search.filter {
            // Security conditions win over structured ones on the same field.
            Some(structured) => structured.clone().merge(&security),
            None => security,
        };

        let keyed_text = format!("{}\u{1f}{text}", self.embeddings.model_name());
        let fingerprint = query_fingerprint(&keyed_text, Some(&filter), depth);

        let raw = match self.cache.get_query_results(&target.namespace, &fingerprint).await {
            Some(hit) => {
                debug!(namespace = %target.namespace, count = hit.len(), "Query cache hit");
                hit
            }
            None => {
                let query = VectorQuery {
                    vector: search.vector.clone(),
                    sparse: search.sparse.clone(),
                    alpha: self.config.hybrid_alpha,
                    top_k: depth,
                    filter: Some(filter),
                };
                let found = self.store.query(&target.namespace, &query).await?;
                self.cache
                    .put_query_results(&target.namespace, &fingerprint, &found)
                    .await;
                found
            }
        };

        Ok(raw
            .into_iter()
            .map(|mut m| {
                m.weighted_score = m.score * target.weight;
                m.rerank = None;
                m
            })
            .collect())
    }
}
