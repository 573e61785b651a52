use anyhow::Result;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::WorkerConfig;

/// Per-resource concurrency caps shared across handlers within one worker
/// process. Each heavy external call (embedding, LLM, vector search)
/// acquires its own semaphore before dispatching, so a burst of concurrent
/// jobs degrades by queueing rather than by overwhelming the provider.
#[derive(Clone)]
pub struct Limiters {
    pub embedding: Arc<Semaphore>,
    pub vector_search: Arc<Semaphore>,
    pub llm_generate: Arc<Semaphore>,
    pub acquire_timeout: Duration,
}

impl Limiters {
    pub fn new(cfg: &WorkerConfig) -> Self {
        Self {
            embedding: Arc::new(Semaphore::new(cfg.embedding_concurrency.max(1))),
            vector_search: Arc::new(Semaphore::new(cfg.vector_search_concurrency.max(1))),
            llm_generate: Arc::new(Semaphore::new(cfg.llm_concurrency.max(1))),
            acquire_timeout: Duration::from_millis(cfg.acquire_timeout_ms.max(1)),
        }
    }

    pub async fn acquire_timed(
        sem: Arc<Semaphore>,
        acquire_timeout: Duration,
        op: &'static str,
    ) -> Result<(OwnedSemaphorePermit, Duration)> {
        let start = Instant::now();

        let permit = tokio::time::timeout(acquire_timeout, sem.acquire_owned())
            .await
            .map_err(|_| anyhow::anyhow!("limiter acquire timeout for op={}", op))??;

        Ok((permit, start.elapsed()))
    }
}
