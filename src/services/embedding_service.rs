//! Text-to-vector embedding, fronted by an in-memory cache and a
//! concurrency limiter so a burst of chunks from one document can't starve
//! other work competing for the same embedding provider.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::utils::error::CoreError;
use crate::utils::limiters::Limiters;

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    input: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    base_url: String,
    pub dimension: usize,
    model_name: String,
    cache: Arc<RwLock<HashMap<String, Vec<f32>>>>,
    limiters: Arc<Limiters>,
    batch_size: usize,
    api_key: Option<String>,
}

/// Collapse any run of whitespace to a single space and trim the ends, so
/// two texts differing only in incidental spacing embed identically and
/// share a cache entry (spec.md §4.3).
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig, limiters: Arc<Limiters>) -> Self {
        let batch_size = config.batch_size;
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url,
            dimension: config.dimension,
            model_name: config.model,
            cache: Arc::new(RwLock::new(HashMap::new())),
            limiters,
            batch_size,
            api_key: config.api_key,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        let text = normalize_whitespace(text);

        {
            let cache = self.cache.read().await;
            if let Some(embedding) = cache.get(&text) {
                debug!(chars = text.len(), "embedding cache hit");
                return Ok(embedding.clone());
            }
        }

        let (_permit, wait) = Limiters::acquire_timed(
            self.limiters.embedding.clone(),
            self.limiters.acquire_timeout,
            "embedding",
        )
        .await
        .map_err(|e| CoreError::EmbeddingFailed(e.to_string()))?;

        debug!(wait_ms = wait.as_millis() as u64, op = "embedding", "wait_queue");

        let exec_start = Instant::now();

        let request = EmbeddingRequest {
            input: text.to_string(),
            model: self.model_name.clone(),
        };

        let url = format!("{}/v1/embeddings", self.base_url);
        let mut request_builder = self.client.post(&url);
        if let Some(key) = &self.api_key {
            request_builder = request_builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = request_builder
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::EmbeddingFailed(format!("failed to connect to embedding server: {}", e)))?;

        debug!(exec_ms = exec_start.elapsed().as_millis() as u64, op = "embedding", "exec");

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::EmbeddingFailed(format!("embedding API error ({}): {}", status, body)));
        }

        let response_body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CoreError::EmbeddingFailed(format!("failed to parse embedding response: {}", e)))?;

        let embedding = response_body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| CoreError::EmbeddingFailed("empty data array returned from embedding server".into()))?;

        if embedding.len() != self.dimension {
            return Err(CoreError::EmbeddingFailed(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }

        {
            let mut cache = self.cache.write().await;
            cache.insert(text.to_string(), embedding.clone());
        }

        Ok(embedding)
    }

    /// Embed many texts, batching requests in groups of `batch_size` to
    /// avoid flooding the embedding semaphore with one document's chunks.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, CoreError> {
        use futures::future::join_all;

        debug!(count = texts.len(), batch_size = self.batch_size, "generating batch embeddings");

        let mut all_results = Vec::with_capacity(texts.len());

        for chunk_batch in texts.chunks(self.batch_size) {
            let futures: Vec<_> = chunk_batch
                .iter()
                .map(|text| {
                    let service = self.clone();
                    let t = text.clone();
                    async move { service.embed(&t).await }
                })
                .collect();

            let results = join_all(futures).await;

            for res in results {
                all_results.push(res?);
            }
        }

        Ok(all_results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_whitespace_collapses_and_trims() {
        assert_eq!(normalize_whitespace("  hello\n\tworld  "), "hello world");
        assert_eq!(normalize_whitespace("hello world"), "hello world");
        assert_eq!(normalize_whitespace(""), "");
    }
}
