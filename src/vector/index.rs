//! VectorIndex: a namespaced client of an external cosine similarity-search
//! service (Pinecone-shaped REST API). The core never implements its own
//! index (spec.md §1 Non-goals); this module only adapts HTTP calls and
//! implements the filter-delete-unsupported fallback the spec mandates.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::VectorIndexConfig;
use crate::models::domain::VectorRecord;
use crate::utils::error::CoreError;

/// A conjunction of metadata predicates: equality or `$in`.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub equals: HashMap<String, String>,
    pub in_set: HashMap<String, Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.insert(key.into(), value.into());
        self
    }

    pub fn is_in(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.in_set.insert(key.into(), values);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty() && self.in_set.is_empty()
    }

    /// Render into the provider's JSON filter shape: `{"field": {"$eq": v}}`
    /// or `{"field": {"$in": [...]}}`, conjoined implicitly (the provider
    /// treats top-level keys as AND).
    fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        for (k, v) in &self.equals {
            obj.insert(k.clone(), serde_json::json!({ "$eq": v }));
        }
        for (k, vs) in &self.in_set {
            obj.insert(k.clone(), serde_json::json!({ "$in": vs }));
        }
        serde_json::Value::Object(obj)
    }
}

#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub metadata: HashMap<String, String>,
}

pub enum DeleteSelector {
    Ids(Vec<String>),
    Filter(Filter),
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<(), CoreError>;

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<QueryMatch>, CoreError>;

    async fn delete(&self, namespace: &str, selector: DeleteSelector) -> Result<(), CoreError>;

    async fn random_sample(&self, namespace: &str, k: usize) -> Result<Vec<QueryMatch>, CoreError>;
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    namespace: &'a str,
    vectors: Vec<UpsertVector>,
}

#[derive(Serialize)]
struct UpsertVector {
    id: String,
    values: Vec<f32>,
    metadata: HashMap<String, String>,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    namespace: &'a str,
    vector: &'a [f32],
    top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<serde_json::Value>,
    include_metadata: bool,
}

#[derive(Deserialize)]
struct QueryResponse {
    matches: Vec<MatchResponse>,
}

#[derive(Deserialize)]
struct MatchResponse {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Serialize)]
struct DeleteByIdsRequest<'a> {
    namespace: &'a str,
    ids: &'a [String],
}

#[derive(Serialize)]
struct DeleteByFilterRequest<'a> {
    namespace: &'a str,
    filter: serde_json::Value,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
}

pub struct RestVectorIndex {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    dimension: usize,
    upsert_batch_size: usize,
}

impl RestVectorIndex {
    pub fn new(config: &VectorIndexConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            dimension: config.dimension,
            upsert_batch_size: config.upsert_batch_size.max(1),
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) if !key.is_empty() => builder.header("Authorization", format!("Bearer {}", key)),
            _ => builder,
        }
    }

    /// One batch of at most `upsert_batch_size` records. The whole batch is
    /// retried by the caller (via the JobQueue's retry policy) on failure,
    /// never partially retried (spec.md §4.4).
    async fn upsert_batch(&self, namespace: &str, records: &[VectorRecord]) -> Result<(), CoreError> {
        let vectors = records
            .iter()
            .map(|r| UpsertVector {
                id: r.id.clone(),
                values: r.vector.clone(),
                metadata: r.metadata.clone(),
            })
            .collect();

        let url = format!("{}/vectors/upsert", self.base_url);
        let response = self
            .authed(self.client.post(&url))
            .json(&UpsertRequest { namespace, vectors })
            .send()
            .await
            .map_err(|e| CoreError::VectorIndexTransient(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::VectorIndexTransient(format!("{}: {}", status, body)));
        }

        Ok(())
    }

    fn detect_filter_delete_unsupported(status: reqwest::StatusCode, body: &str) -> bool {
        if status == reqwest::StatusCode::NOT_IMPLEMENTED {
            return true;
        }
        serde_json::from_str::<ErrorBody>(body)
            .map(|e| e.code == "filter_delete_unsupported")
            .unwrap_or(false)
    }
}

#[async_trait]
impl VectorIndex for RestVectorIndex {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<(), CoreError> {
        for batch in records.chunks(self.upsert_batch_size) {
            self.upsert_batch(namespace, batch).await?;
        }
        debug!(namespace, count = records.len(), "upserted vector records");
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<QueryMatch>, CoreError> {
        if vector.len() != self.dimension {
            return Err(CoreError::VectorIndexTransient(format!(
                "query vector dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            )));
        }

        let url = format!("{}/query", self.base_url);
        let request = QueryRequest {
            namespace,
            vector,
            top_k,
            filter: filter.filter(|f| !f.is_empty()).map(Filter::to_json),
            include_metadata: true,
        };

        let response = self
            .authed(self.client.post(&url))
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::VectorIndexTransient(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::VectorIndexTransient(format!("{}: {}", status, body)));
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| CoreError::VectorIndexTransient(e.to_string()))?;

        Ok(body
            .matches
            .into_iter()
            .map(|m| QueryMatch {
                id: m.id,
                score: m.score.clamp(0.0, 1.0),
                metadata: m.metadata,
            })
            .collect())
    }

    async fn delete(&self, namespace: &str, selector: DeleteSelector) -> Result<(), CoreError> {
        match selector {
            DeleteSelector::Ids(ids) => {
                for batch in ids.chunks(self.upsert_batch_size) {
                    let url = format!("{}/vectors/delete", self.base_url);
                    let response = self
                        .authed(self.client.post(&url))
                        .json(&DeleteByIdsRequest { namespace, ids: batch })
                        .send()
                        .await
                        .map_err(|e| CoreError::VectorIndexTransient(e.to_string()))?;

                    if !response.status().is_success() {
                        let status = response.status();
                        let body = response.text().await.unwrap_or_default();
                        return Err(CoreError::VectorIndexTransient(format!("{}: {}", status, body)));
                    }
                }
                Ok(())
            }
            DeleteSelector::Filter(filter) => {
                let url = format!("{}/vectors/delete", self.base_url);
                let response = self
                    .authed(self.client.post(&url))
                    .json(&DeleteByFilterRequest {
                        namespace,
                        filter: filter.to_json(),
                    })
                    .send()
                    .await
                    .map_err(|e| CoreError::VectorIndexTransient(e.to_string()))?;

                if response.status().is_success() {
                    return Ok(());
                }

                let status = response.status();
                let body = response.text().await.unwrap_or_default();

                if !Self::detect_filter_delete_unsupported(status, &body) {
                    return Err(CoreError::VectorIndexTransient(format!("{}: {}", status, body)));
                }

                warn!(namespace, "filter-delete unsupported by index tier, falling back to id-based deletion");

                // Fallback: query a dummy vector with the filter, top_k
                // large, collect ids, delete by id in batches. This is the
                // only correct deletion path on constrained service tiers
                // (spec.md §4.4).
                let dummy = vec![0.0f32; self.dimension];
                let matches = self.query(namespace, &dummy, 10_000, Some(&filter)).await?;
                let ids: Vec<String> = matches.into_iter().map(|m| m.id).collect();

                if ids.is_empty() {
                    return Ok(());
                }

                self.delete(namespace, DeleteSelector::Ids(ids)).await
            }
        }
    }

    async fn random_sample(&self, namespace: &str, k: usize) -> Result<Vec<QueryMatch>, CoreError> {
        use rand::Rng;
        let random_unit: Vec<f32> = {
            let mut rng = rand::rng();
            (0..self.dimension).map(|_| rng.random_range(-1.0..1.0)).collect()
        };
        let oversample = (k * 4).max(k);
        let mut matches = self.query(namespace, &random_unit, oversample, None).await?;
        matches.truncate(k);
        Ok(matches)
    }
}
