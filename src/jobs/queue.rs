//! A durable, at-least-once job queue backed by a Postgres table rather
//! than the teacher's in-memory `VecDeque` (spec.md §4.8): a worker crash
//! mid-task must not lose the job, so every enqueue, claim, and completion
//! is a row update, not a channel send. `flume` still carries the
//! wake-on-enqueue signal so a newly enqueued job doesn't wait out a full
//! poll interval when the worker is otherwise idle.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::database::DbPool;
use crate::utils::error::CoreError;

pub type TaskHandler =
    Arc<dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send>> + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClaimedJob {
    id: i64,
    task_name: String,
    args: serde_json::Value,
    attempts: i32,
}

pub struct JobQueue {
    pool: DbPool,
    handlers: DashMap<String, TaskHandler>,
    config: WorkerConfig,
    wake_tx: flume::Sender<()>,
    wake_rx: flume::Receiver<()>,
}

impl JobQueue {
    pub fn new(pool: DbPool, config: WorkerConfig) -> Self {
        let (wake_tx, wake_rx) = flume::unbounded();
        Self { pool, handlers: DashMap::new(), config, wake_tx, wake_rx }
    }

    /// Register the handler for `task_name`. Binding the same name twice
    /// replaces the previous handler, matching how the teacher's
    /// notification-driven dispatch only ever had one handler in scope.
    pub fn bind(&self, task_name: &str, handler: TaskHandler) {
        self.handlers.insert(task_name.to_string(), handler);
    }

    pub async fn enqueue(&self, task_name: &str, args: serde_json::Value) -> Result<i64, CoreError> {
        let row = sqlx::query(
            r#"INSERT INTO jobs (task_name, args, status, attempts, max_retries, next_attempt_at, created_at)
               VALUES ($1, $2, 'PENDING', 0, $3, now(), now())
               RETURNING id"#,
        )
        .bind(task_name)
        .bind(&args)
        .bind(self.config.max_retries as i32)
        .fetch_one(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        let id: i64 = row.try_get("id").map_err(|e| CoreError::Internal(e.into()))?;
        let _ = self.wake_tx.send(());
        Ok(id)
    }

    /// Poll loop: claim one ready job at a time, run its bound handler
    /// under `task_time_limit_secs`, and resolve success/failure. Runs
    /// until the process is killed; intended to be the whole body of the
    /// worker binary's main task.
    pub async fn run(self: Arc<Self>) {
        let mut processed: u64 = 0;

        loop {
            match self.claim_next().await {
                Ok(Some(job)) => {
                    self.process(job).await;
                    processed += 1;
                    if processed % self.config.recycle_after_n_tasks.max(1) == 0 {
                        info!(processed, "job queue recycling checkpoint");
                    }
                }
                Ok(None) => {
                    let _ = tokio::time::timeout(
                        Duration::from_millis(self.config.poll_interval_ms),
                        self.wake_rx.recv_async(),
                    )
                    .await;
                }
                Err(e) => {
                    error!(error = %e, "failed to claim next job");
                    tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                }
            }
        }
    }

    async fn claim_next(&self) -> Result<Option<ClaimedJob>, CoreError> {
        let row = sqlx::query(
            r#"UPDATE jobs SET status = 'RUNNING'
               WHERE id = (
                   SELECT id FROM jobs
                   WHERE status = 'PENDING' AND next_attempt_at <= now()
                   ORDER BY next_attempt_at
                   FOR UPDATE SKIP LOCKED
                   LIMIT 1
               )
               RETURNING id, task_name, args, attempts"#,
        )
        .fetch_optional(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        let Some(row) = row else { return Ok(None) };

        Ok(Some(ClaimedJob {
            id: row.try_get("id").map_err(|e| CoreError::Internal(e.into()))?,
            task_name: row.try_get("task_name").map_err(|e| CoreError::Internal(e.into()))?,
            args: row.try_get("args").map_err(|e| CoreError::Internal(e.into()))?,
            attempts: row.try_get("attempts").map_err(|e| CoreError::Internal(e.into()))?,
        }))
    }

    async fn process(&self, job: ClaimedJob) {
        let Some(handler) = self.handlers.get(&job.task_name).map(|h| h.clone()) else {
            warn!(task_name = %job.task_name, job_id = job.id, "no handler bound for task, marking FAILED");
            let _ = self.mark_failed(job.id, "no handler bound for this task name").await;
            return;
        };

        let time_limit = Duration::from_secs(self.config.task_time_limit_secs);
        let result = tokio::time::timeout(time_limit, handler(job.args.clone())).await;

        match result {
            Ok(Ok(())) => {
                debug!(job_id = job.id, task_name = %job.task_name, "job completed");
                let _ = self.mark_done(job.id).await;
            }
            Ok(Err(e)) => {
                self.handle_failure(&job, &e.to_string(), e.is_retryable()).await;
            }
            Err(_) => {
                self.handle_failure(&job, "task exceeded its time limit", true).await;
            }
        }
    }

    async fn handle_failure(&self, job: &ClaimedJob, message: &str, retryable: bool) {
        let attempts = job.attempts + 1;

        if !retryable || attempts as u32 >= self.config.max_retries {
            error!(job_id = job.id, task_name = %job.task_name, attempts, message, "job failed permanently");
            let _ = self.mark_failed(job.id, message).await;
            return;
        }

        let delay = backoff_with_jitter(
            self.config.initial_delay_ms,
            self.config.backoff_multiplier,
            self.config.jitter_fraction,
            attempts as u32,
        );

        warn!(job_id = job.id, task_name = %job.task_name, attempts, delay_ms = delay, message, "job failed, scheduling retry");

        let _ = sqlx::query(
            r#"UPDATE jobs SET status = 'PENDING', attempts = $2, last_error = $3,
                      next_attempt_at = now() + ($4 || ' milliseconds')::interval
               WHERE id = $1"#,
        )
        .bind(job.id)
        .bind(attempts)
        .bind(message)
        .bind(delay.to_string())
        .execute(self.pool.get_pool())
        .await;
    }

    async fn mark_done(&self, job_id: i64) -> Result<(), CoreError> {
        sqlx::query("UPDATE jobs SET status = 'DONE' WHERE id = $1")
            .bind(job_id)
            .execute(self.pool.get_pool())
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }

    async fn mark_failed(&self, job_id: i64, message: &str) -> Result<(), CoreError> {
        sqlx::query("UPDATE jobs SET status = 'FAILED', last_error = $2 WHERE id = $1")
            .bind(job_id)
            .bind(message)
            .execute(self.pool.get_pool())
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }
}

/// Exponential backoff with proportional jitter:
/// `initial * multiplier^(attempt-1) * (1 +/- jitter_fraction)`.
fn backoff_with_jitter(initial_ms: u64, multiplier: f64, jitter_fraction: f64, attempt: u32) -> u64 {
    let base = initial_ms as f64 * multiplier.powi(attempt as i32 - 1);
    let jitter_span = base * jitter_fraction;
    let jitter = rand::rng().random_range(-jitter_span..=jitter_span);
    (base + jitter).max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_with_attempt_count() {
        let first = backoff_with_jitter(1000, 2.0, 0.0, 1);
        let second = backoff_with_jitter(1000, 2.0, 0.0, 2);
        let third = backoff_with_jitter(1000, 2.0, 0.0, 3);
        assert_eq!(first, 1000);
        assert_eq!(second, 2000);
        assert_eq!(third, 4000);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let delay = backoff_with_jitter(1000, 2.0, 0.2, 2);
            assert!(delay >= 1600 && delay <= 2400);
        }
    }
}
