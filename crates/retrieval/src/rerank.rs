//! Cross-encoder rerank fusion.

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tenantrag_core::{
    keys, with_retry, RagError, RerankConfig, RerankInfo, Result, RetryConfig, SearchMatch,
};
use tracing::{debug, warn};

const PROVIDER: &str = "rerank";

/// New relevance score for the candidate at `index`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankScore {
    /// Position in the submitted document list
    pub index: usize,

    /// Relevance score
    pub score: f32,
}

/// Cross-encoder rerank provider.
#[async_trait]
pub trait RerankProvider: Send + Sync {
    /// Largest number of documents accepted per request.
    fn max_candidates(&self) -> usize;

    /// Score every document against `query`.
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankScore>>;
}

/// Cohere-compatible `/rerank` client.
#[derive(Clone)]
pub struct HttpRerankClient {
    /// HTTP client
    client: Client,

    /// API base url
    base_url: String,

    /// API key
    api_key: String,

    /// Model name
    model: String,

    /// Documents per request
    max_candidates: usize,

    /// Retry policy for transient failures
    retry: RetryConfig,
}

impl HttpRerankClient {
    /// Create a new rerank client.
    pub fn new(config: &RerankConfig, api_key: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            client: ClientBuilder::new()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.model.clone(),
            max_candidates: config.max_candidates,
            retry,
        }
    }

    async fn request(&self, query: &str, documents: &[String]) -> Result<Vec<RerankScore>> {
        let payload = json!({
            "model": self.model,
            "query": query,
            "documents": documents,
            "top_n": documents.len(),
        });

        let response = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RagError::from_status(PROVIDER, status, error_text));
        }

        let body: serde_json::Value = response.json().await?;
        parse_rerank_response(&body)
    }
}

/// Parse a `{"results": [{"index", "relevance_score"}]}` body.
pub fn parse_rerank_response(body: &serde_json::Value) -> Result<Vec<RerankScore>> {
    #[derive(serde::Deserialize)]
    struct Item {
        index: usize,
        relevance_score: f32,
    }

    #[derive(serde::Deserialize)]
    struct Response {
        results: Vec<Item>,
    }

    let parsed: Response = serde_json::from_value(body.clone())
        .map_err(|e| RagError::provider(PROVIDER, format!("malformed response: {e}")))?;
    Ok(parsed
        .results
        .into_iter()
        .map(|item| RerankScore {
            index: item.index,
            score: item.relevance_score,
        })
        .collect())
}

#[async_trait]
impl RerankProvider for HttpRerankClient {
    fn max_candidates(&self) -> usize {
        self.max_candidates
    }

    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankScore>> {
        if documents.is_empty() {
            return Ok(vec![]);
        }
        debug!(count = documents.len(), model = %self.model, "Requesting rerank");
        with_retry(&self.retry, || self.request(query, documents)).await
    }
}

/// Applies a [`RerankProvider`] to merged candidates.
///
/// Failure never surfaces: the original order is kept with synthetic,
/// strictly decreasing scores and the matches are marked as fallback.
#[derive(Clone, Default)]
pub struct RerankFusion {
    provider: Option<Arc<dyn RerankProvider>>,
}

impl RerankFusion {
    /// Fusion over `provider`.
    pub fn new(provider: Arc<dyn RerankProvider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    /// Fusion that leaves candidates untouched.
    pub fn disabled() -> Self {
        Self { provider: None }
    }

    /// Whether a provider is configured.
    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Rerank `candidates`, which arrive sorted by weighted score.
    ///
    /// Candidates beyond the provider limit are cut off before the call.
    pub async fn rerank(&self, query: &str, mut candidates: Vec<SearchMatch>) -> Vec<SearchMatch> {
        let Some(provider) = &self.provider else {
            return candidates;
        };
        if candidates.is_empty() {
            return candidates;
        }

        candidates.truncate(provider.max_candidates().max(1));
        let documents: Vec<String> = candidates.iter().map(document_text).collect();

        let scores = match provider.rerank(query, &documents).await {
            Ok(scores) => match check_scores(&scores, candidates.len()) {
                Ok(()) => scores,
                Err(e) => {
                    warn!(error = %e, "Rerank response rejected, keeping original order");
                    return fallback(candidates);
                }
            },
            Err(e) => {
                warn!(error = %e, "Rerank failed, keeping original order");
                return fallback(candidates);
            }
        };

        let mut ordered = scores;
        ordered.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.index.cmp(&b.index))
        });

        let mut slots: Vec<Option<SearchMatch>> = candidates.into_iter().map(Some).collect();
        ordered
            .into_iter()
            .filter_map(|s| {
                let mut m = slots.get_mut(s.index)?.take()?;
                m.rerank = Some(RerankInfo {
                    score: s.score,
                    original_rank: s.index,
                    original_score: m.weighted_score,
                    fallback: false,
                });
                Some(m)
            })
            .collect()
    }
}

fn document_text(m: &SearchMatch) -> String {
    m.meta_str(keys::TEXT)
        .or_else(|| m.meta_str(keys::PARENT_TEXT))
        .unwrap_or_default()
        .to_string()
}

/// Every candidate must be scored exactly once.
fn check_scores(scores: &[RerankScore], expected: usize) -> Result<()> {
    if scores.len() != expected {
        return Err(RagError::provider(
            PROVIDER,
            format!("expected {expected} scores, got {}", scores.len()),
        ));
    }
    let mut seen = HashSet::with_capacity(expected);
    for s in scores {
        if s.index >= expected || !seen.insert(s.index) {
            return Err(RagError::provider(PROVIDER, format!("invalid result index {}", s.index)));
        }
        if !s.score.is_finite() {
            return Err(RagError::provider(PROVIDER, "non-finite score"));
        }
    }
    Ok(())
}

fn fallback(candidates: Vec<SearchMatch>) -> Vec<SearchMatch> {
    candidates
        .into_iter()
        .enumerate()
        .map(|(rank, mut m)| {
            m.rerank = Some(RerankInfo {
                score: 1.0 / (1.0 + rank as f32),
                original_rank: rank,
                original_score: m.weighted_score,
                fallback: true,
            });
            m
        })
        .collect()
}
