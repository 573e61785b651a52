//! Reranking is a refinement pass over an already-retrieved candidate set,
//! never a replacement for the primary similarity search (spec.md §4.5).
//! A reranker failure is never fatal: callers fall back to the original
//! ordering rather than failing the whole query.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::config::RerankerConfig;

#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub id: String,
    pub text: String,
    pub original_score: f32,
}

#[derive(Debug, Clone)]
pub struct RerankedCandidate {
    pub id: String,
    pub original_score: f32,
    pub score: f32,
}

#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, candidates: Vec<RerankCandidate>) -> Vec<RerankedCandidate>;
}

/// The process-wide reranker: a no-op passthrough when `reranker.enabled` is
/// false, otherwise the configured variant. Built once at startup and shared
/// via `Arc` through `AppState`, matching the embedding client's singleton
/// shape.
pub fn build_reranker(config: &RerankerConfig) -> Box<dyn Reranker> {
    if !config.enabled {
        return Box::new(NoopReranker);
    }

    match config.variant.as_str() {
        "cohere" => Box::new(CohereReranker::new(config)),
        "cross_encoder" => Box::new(RemoteScoringReranker::new(config, "cross_encoder")),
        "flag_embedding" => Box::new(RemoteScoringReranker::new(config, "flag_embedding")),
        other => {
            warn!(variant = other, "unknown reranker variant, falling back to passthrough");
            Box::new(NoopReranker)
        }
    }
}

struct NoopReranker;

#[async_trait]
impl Reranker for NoopReranker {
    async fn rerank(&self, _query: &str, candidates: Vec<RerankCandidate>) -> Vec<RerankedCandidate> {
        candidates
            .into_iter()
            .map(|c| RerankedCandidate {
                id: c.id,
                original_score: c.original_score,
                score: c.original_score,
            })
            .collect()
    }
}

fn apply_threshold_and_normalize(
    mut ranked: Vec<RerankedCandidate>,
    min_score: Option<f32>,
    normalize: bool,
) -> Vec<RerankedCandidate> {
    if normalize && !ranked.is_empty() {
        let min = ranked.iter().map(|c| c.score).fold(f32::INFINITY, f32::min);
        let max = ranked.iter().map(|c| c.score).fold(f32::NEG_INFINITY, f32::max);
        let span = (max - min).max(f32::EPSILON);
        for c in ranked.iter_mut() {
            c.score = (c.score - min) / span;
        }
    }

    if let Some(min_score) = min_score {
        ranked.retain(|c| c.score >= min_score);
    }

    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

/// Cohere-shaped remote rerank API: `POST /v1/rerank` with `{query,
/// documents}`, returning `{results: [{index, relevance_score}]}`.
struct CohereReranker {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    min_score: Option<f32>,
    normalize: bool,
}

#[derive(Serialize)]
struct CohereRequest<'a> {
    query: &'a str,
    documents: Vec<&'a str>,
}

#[derive(Deserialize)]
struct CohereResponse {
    results: Vec<CohereResult>,
}

#[derive(Deserialize)]
struct CohereResult {
    index: usize,
    relevance_score: f32,
}

impl CohereReranker {
    fn new(config: &RerankerConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url.clone().unwrap_or_default(),
            api_key: config.api_key.clone(),
            min_score: config.min_score,
            normalize: config.normalize,
        }
    }
}

#[async_trait]
impl Reranker for CohereReranker {
    async fn rerank(&self, query: &str, candidates: Vec<RerankCandidate>) -> Vec<RerankedCandidate> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let documents: Vec<&str> = candidates.iter().map(|c| c.text.as_str()).collect();
        let url = format!("{}/v1/rerank", self.base_url);

        let mut request = self.client.post(&url);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let result = request
            .json(&CohereRequest { query, documents })
            .send()
            .await;

        let response = match result {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(status = %r.status(), "reranker returned non-success status, falling back to original order");
                return original_order(candidates);
            }
            Err(e) => {
                warn!(error = %e, "reranker request failed, falling back to original order");
                return original_order(candidates);
            }
        };

        let parsed: CohereResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "reranker response unparsable, falling back to original order");
                return original_order(candidates);
            }
        };

        let mut ranked: Vec<RerankedCandidate> = parsed
            .results
            .into_iter()
            .filter_map(|r| {
                candidates.get(r.index).map(|c| RerankedCandidate {
                    id: c.id.clone(),
                    original_score: c.original_score,
                    score: r.relevance_score,
                })
            })
            .collect();

        if ranked.is_empty() {
            return original_order(candidates);
        }

        ranked = apply_threshold_and_normalize(ranked, self.min_score, self.normalize);
        ranked
    }
}

/// Cross-encoder / flag-embedding self-hosted scoring services share the
/// same wire shape in practice: `POST /rerank` with `{query, texts}` ->
/// `{scores: [f32]}` aligned by index.
struct RemoteScoringReranker {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    min_score: Option<f32>,
    normalize: bool,
    variant: &'static str,
}

#[derive(Serialize)]
struct ScoringRequest<'a> {
    query: &'a str,
    texts: Vec<&'a str>,
}

#[derive(Deserialize)]
struct ScoringResponse {
    scores: Vec<f32>,
}

impl RemoteScoringReranker {
    fn new(config: &RerankerConfig, variant: &'static str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url.clone().unwrap_or_default(),
            api_key: config.api_key.clone(),
            min_score: config.min_score,
            normalize: config.normalize,
            variant,
        }
    }
}

#[async_trait]
impl Reranker for RemoteScoringReranker {
    async fn rerank(&self, query: &str, candidates: Vec<RerankCandidate>) -> Vec<RerankedCandidate> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let texts: Vec<&str> = candidates.iter().map(|c| c.text.as_str()).collect();
        let url = format!("{}/rerank", self.base_url);

        let mut request = self.client.post(&url);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let result = request.json(&ScoringRequest { query, texts }).send().await;

        let response = match result {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(status = %r.status(), variant = self.variant, "reranker returned non-success status, falling back to original order");
                return original_order(candidates);
            }
            Err(e) => {
                warn!(error = %e, variant = self.variant, "reranker request failed, falling back to original order");
                return original_order(candidates);
            }
        };

        let parsed: ScoringResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, variant = self.variant, "reranker response unparsable, falling back to original order");
                return original_order(candidates);
            }
        };

        if parsed.scores.len() != candidates.len() {
            warn!(variant = self.variant, "reranker score count mismatch, falling back to original order");
            return original_order(candidates);
        }

        let ranked: Vec<RerankedCandidate> = candidates
            .iter()
            .zip(parsed.scores)
            .map(|(c, score)| RerankedCandidate {
                id: c.id.clone(),
                original_score: c.original_score,
                score,
            })
            .collect();

        apply_threshold_and_normalize(ranked, self.min_score, self.normalize)
    }
}

fn original_order(candidates: Vec<RerankCandidate>) -> Vec<RerankedCandidate> {
    candidates
        .into_iter()
        .map(|c| RerankedCandidate {
            id: c.id,
            original_score: c.original_score,
            score: c.original_score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_reranker_preserves_original_scores() {
        let reranker = NoopReranker;
        let candidates = vec![
            RerankCandidate { id: "a".into(), text: "x".into(), original_score: 0.9 },
            RerankCandidate { id: "b".into(), text: "y".into(), original_score: 0.5 },
        ];
        let ranked = reranker.rerank("q", candidates).await;
        assert_eq!(ranked[0].score, 0.9);
        assert_eq!(ranked[1].score, 0.5);
    }

    #[test]
    fn normalize_scales_to_unit_range() {
        let ranked = vec![
            RerankedCandidate { id: "a".into(), original_score: 0.0, score: 4.0 },
            RerankedCandidate { id: "b".into(), original_score: 0.0, score: 2.0 },
            RerankedCandidate { id: "c".into(), original_score: 0.0, score: 0.0 },
        ];
        let result = apply_threshold_and_normalize(ranked, None, true);
        assert_eq!(result[0].id, "a");
        assert!((result[0].score - 1.0).abs() < f32::EPSILON);
        assert!((result[2].score - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn min_score_filters_low_candidates() {
        let ranked = vec![
            RerankedCandidate { id: "a".into(), original_score: 0.0, score: 0.9 },
            RerankedCandidate { id: "b".into(), original_score: 0.0, score: 0.1 },
        ];
        let result = apply_threshold_and_normalize(ranked, Some(0.5), false);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "a");
    }
}
