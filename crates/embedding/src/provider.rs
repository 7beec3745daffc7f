//! Dense embedding provider contract and the OpenAI-compatible adapter.

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde_json::json;
use tenantrag_core::{with_retry, EmbeddingConfig, RagError, Result, RetryConfig};
use tracing::debug;

const PROVIDER: &str = "embedding";

/// Dense embedding provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model name, part of every embedding cache key.
    fn model_name(&self) -> &str;

    /// Output dimension.
    fn dimension(&self) -> usize;

    /// Largest number of texts accepted per request.
    fn max_batch_size(&self) -> usize;

    /// Embed `texts`, returning one vector per input in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// OpenAI-compatible `/embeddings` client.
#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    /// HTTP client
    client: Client,

    /// API base url
    base_url: String,

    /// API key
    api_key: String,

    /// Model name
    model: String,

    /// Expected output dimension
    dimension: usize,

    /// Texts per request
    max_batch_size: usize,

    /// Retry policy for transient failures
    retry: RetryConfig,
}

impl OpenAiEmbeddingClient {
    /// Create a new embedding client.
    pub fn new(config: &EmbeddingConfig, api_key: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            client: ClientBuilder::new()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.model.clone(),
            dimension: config.dimension,
            max_batch_size: config.max_batch_size,
            retry,
        }
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let payload = json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RagError::from_status(PROVIDER, status, error_text));
        }

        #[derive(serde::Deserialize)]
        struct Item {
            index: usize,
            embedding: Vec<f32>,
        }

        #[derive(serde::Deserialize)]
        struct Response {
            data: Vec<Item>,
        }

        let mut response_data: Response = response.json().await?;
        response_data.data.sort_by_key(|item| item.index);
        Ok(response_data.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if texts.len() > self.max_batch_size {
            return Err(RagError::invalid_input(format!(
                "{} texts exceed the provider batch limit of {}",
                texts.len(),
                self.max_batch_size
            )));
        }

        debug!(count = texts.len(), model = %self.model, "Requesting embeddings");
        let vectors = with_retry(&self.retry, || self.request(texts)).await?;
        validate_batch(texts.len(), self.dimension, &vectors)?;
        Ok(vectors)
    }
}

/// Check count and dimension of a provider response.
pub fn validate_batch(expected: usize, dimension: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if vectors.len() != expected {
        return Err(RagError::provider(
            PROVIDER,
            format!("expected {expected} embeddings, got {}", vectors.len()),
        ));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(RagError::provider(
            PROVIDER,
            format!("expected dimension {dimension}, got {}", bad.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_batch_limit_is_enforced_before_any_request() {
        let config = EmbeddingConfig {
            base_url: "http://127.0.0.1:9".into(),
            max_batch_size: 2,
            ..Default::default()
        };
        let client = OpenAiEmbeddingClient::new(&config, "key", RetryConfig::none());
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let err = client.embed_batch(&texts).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));

        assert!(client.embed_batch(&[]).await.unwrap().is_empty());
    }

    #[test]
    fn test_validate_batch() {
        assert!(validate_batch(2, 3, &[vec![0.0; 3], vec![0.0; 3]]).is_ok());
        assert!(validate_batch(2, 3, &[vec![0.0; 3]]).is_err());
        assert!(validate_batch(1, 3, &[vec![0.0; 2]]).is_err());
    }

    #[test]
    fn test_default_limit_matches_provider() {
        let client = OpenAiEmbeddingClient::new(&EmbeddingConfig::default(), "key", RetryConfig::none());
        assert_eq!(client.max_batch_size(), 2048);
        assert_eq!(client.model_name(), "text-embedding-3-small");
    }
}
