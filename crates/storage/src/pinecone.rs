//! Pinecone-compatible hosted index adapter.
//!
//! Only this module knows the wire format. Hybrid weighting is applied
//! client side: dense values are scaled by `alpha` and sparse values by
//! `1 - alpha`, so the server's dot product yields the blended score.

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tenantrag_core::{
    with_retry, Metadata, RagError, Result, RetryConfig, SearchMatch, SparseVector, VectorQuery,
};
use tracing::{debug, info};

use crate::vector::{IndexStats, VectorRecord, VectorStore};

const PROVIDER: &str = "vector-store";

/// Vectors per upsert request.
pub const UPSERT_BATCH: usize = 100;

/// Hosted index client.
#[derive(Clone)]
pub struct PineconeVectorStore {
    /// HTTP client
    client: Client,

    /// Index host url
    host: String,

    /// API key
    api_key: String,

    /// Retry policy for transient failures
    retry: RetryConfig,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<WireMatch>,
}

#[derive(Deserialize)]
struct WireMatch {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    #[serde(default)]
    dimension: usize,
    #[serde(default)]
    total_vector_count: u64,
    #[serde(default)]
    namespaces: BTreeMap<String, NamespaceSummary>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceSummary {
    #[serde(default)]
    vector_count: u64,
}

fn sparse_json(sparse: &SparseVector) -> Value {
    json!({ "indices": sparse.indices, "values": sparse.values })
}

impl PineconeVectorStore {
    /// Create a new client for the index at `host`.
    pub fn new(host: impl Into<String>, api_key: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            client: ClientBuilder::new()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            host: host.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            retry,
        }
    }

    async fn post(&self, path: &str, payload: &Value) -> Result<Value> {
        with_retry(&self.retry, || async move {
            let response = self
                .client
                .post(format!("{}{}", self.host, path))
                .header("Api-Key", &self.api_key)
                .json(payload)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(RagError::from_status(PROVIDER, status, body));
            }
            Ok(response.json::<Value>().await?)
        })
        .await
    }

    fn record_json(record: &VectorRecord) -> Value {
        let mut value = json!({
            "id": record.id,
            "values": record.values,
            "metadata": record.metadata,
        });
        if let Some(sparse) = record.sparse.as_ref().filter(|s| !s.is_empty()) {
            value["sparseValues"] = sparse_json(sparse);
        }
        value
    }
}

#[async_trait]
impl VectorStore for PineconeVectorStore {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<usize> {
        let mut written = 0;
        for batch in records.chunks(UPSERT_BATCH) {
            let payload = json!({
                "namespace": namespace,
                "vectors": batch.iter().map(Self::record_json).collect::<Vec<_>>(),
            });
            let response = self.post("/vectors/upsert", &payload).await?;
            written += response["upsertedCount"].as_u64().unwrap_or(batch.len() as u64) as usize;
        }
        debug!(namespace, written, "Upserted vectors");
        Ok(written)
    }

    async fn query(&self, namespace: &str, query: &VectorQuery) -> Result<Vec<SearchMatch>> {
        let dense: Vec<f32> = query.vector.iter().map(|v| v * query.alpha).collect();
        let mut payload = json!({
            "namespace": namespace,
            "vector": dense,
            "topK": query.top_k,
            "includeMetadata": true,
        });
        if let Some(sparse) = query.sparse.as_ref().filter(|s| !s.is_empty()) {
            payload["sparseVector"] = sparse_json(&sparse.scaled(1.0 - query.alpha));
        }
        if let Some(filter) = query.filter.as_ref().filter(|f| !f.is_empty()) {
            payload["filter"] = filter.to_wire();
        }

        let response: QueryResponse = serde_json::from_value(self.post("/query", &payload).await?)?;
        Ok(response
            .matches
            .into_iter()
            .map(|m| SearchMatch {
                id: m.id,
                score: m.score,
                weighted_score: m.score,
                metadata: m.metadata,
                namespace: namespace.to_string(),
                rerank: None,
            })
            .collect())
    }

    async fn describe_stats(&self) -> Result<IndexStats> {
        let response: StatsResponse =
            serde_json::from_value(self.post("/describe_index_stats", &json!({})).await?)?;
        let stats = IndexStats {
            dimension: response.dimension,
            total_vector_count: response.total_vector_count,
            namespaces: response
                .namespaces
                .into_iter()
                .map(|(name, summary)| (name, summary.vector_count))
                .collect(),
        };
        info!(
            total = stats.total_vector_count,
            namespaces = stats.namespaces.len(),
            "Index stats"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantrag_core::keys;

    #[test]
    fn test_record_json_omits_empty_sparse() {
        let mut metadata = Metadata::new();
        metadata.insert(keys::OWNER_ID.into(), "1001".into());
        let record = VectorRecord {
            id: "employee_1001#doc#000000".into(),
            values: vec![0.1, 0.2],
            sparse: Some(SparseVector::default()),
            metadata,
        };
        let value = PineconeVectorStore::record_json(&record);
        assert_eq!(value["id"], "employee_1001#doc#000000");
        assert_eq!(value["metadata"]["owner_id"], "1001");
        assert!(value.get("sparseValues").is_none());
    }

    #[test]
    fn test_stats_response_parsing() {
        let raw = json!({
            "dimension": 1536,
            "totalVectorCount": 12,
            "namespaces": { "employee_1001": { "vectorCount": 12 } }
        });
        let parsed: StatsResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.total_vector_count, 12);
        assert_eq!(parsed.namespaces["employee_1001"].vector_count, 12);
    }

    #[test]
    fn test_query_response_metadata() {
        let raw = json!({
            "matches": [{
                "id": "a",
                "score": 0.8,
                "metadata": { "owner_id": "1001", "clearance_level": 1.0 }
            }]
        });
        let parsed: QueryResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.matches[0].metadata.get(keys::CLEARANCE_LEVEL).and_then(|v| v.as_f64()), Some(1.0));
    }
}
