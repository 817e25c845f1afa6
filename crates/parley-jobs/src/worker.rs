// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! The worker loop: `BRPOP` across the registered task queues, claim the
//! durable row, dispatch into the registry, retry transient failures with
//! jittered exponential backoff.
//!
//! The queue delivers at-least-once; processors are idempotent by key, so
//! side effects stay at-most-once.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use redis::{aio::ConnectionManager, AsyncCommands};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use parley_store::JobStore;

use crate::{
    client::{queue_key, JobClient},
    registry::{JobContext, JobRegistry},
};

const POLL_TIMEOUT_SECS: f64 = 5.0;
const MIN_RETRY_DELAY: Duration = Duration::from_secs(5);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

pub struct Worker {
    registry: Arc<JobRegistry>,
    pool: SqlitePool,
    redis: ConnectionManager,
    client: JobClient,
}

impl Worker {
    pub async fn connect(
        registry: Arc<JobRegistry>,
        pool: SqlitePool,
        redis_url: &str,
    ) -> anyhow::Result<Self> {
        let redis_client = redis::Client::open(redis_url)?;
        let redis = redis_client.get_connection_manager().await?;
        let client = JobClient::connect(pool.clone(), redis_url).await?;
        Ok(Self { registry, pool, redis, client })
    }

    /// Run until `shutdown` flips to `true`.  In-flight jobs finish; no new
    /// ones are popped afterwards.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let keys: Vec<String> =
            self.registry.task_names().iter().map(|t| queue_key(t)).collect();
        info!(tasks = ?self.registry.task_names(), "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let popped = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                result = self.pop(&keys) => result,
            };
            match popped {
                Ok(Some(envelope)) => self.handle(envelope).await,
                Ok(None) => {} // poll timeout, loop again
                Err(e) => {
                    warn!(error = %e, "queue pop failed; backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        info!("worker stopped");
    }

    async fn pop(&self, keys: &[String]) -> Result<Option<Value>, redis::RedisError> {
        let mut conn = self.redis.clone();
        let result: Option<(String, String)> = conn.brpop(keys, POLL_TIMEOUT_SECS).await?;
        Ok(result.and_then(|(_, raw)| serde_json::from_str(&raw).ok()))
    }

    async fn handle(&self, envelope: Value) {
        let Some(job_id) = envelope["job_id"].as_str() else {
            warn!(?envelope, "dropping malformed queue envelope");
            return;
        };

        let store = JobStore::new(&self.pool);
        // Claim flips queued → running; a cancelled job comes back None and
        // is silently skipped.
        let job = match store.claim(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                info!(job_id, "skipping job no longer queued");
                return;
            }
            Err(e) => {
                error!(job_id, error = %e, "failed to claim job");
                return;
            }
        };

        let Some(processor) = self.registry.get(&job.task_name) else {
            // Unknown task: fail fast, never retry.
            error!(job_id, task = %job.task_name, "unknown task");
            let _ = store
                .mark_failed(job_id, &format!("unknown task: {}", job.task_name))
                .await;
            return;
        };

        let ctx = JobContext {
            job_id: job.id.clone(),
            task_name: job.task_name.clone(),
            attempt: job.attempts,
            max_attempts: job.max_attempts,
            user_id: job.user_id.clone(),
        };
        info!(job_id, task = %job.task_name, attempt = job.attempts, "processing job");

        // Each job gets its own handle onto the database; connections are
        // never shared across concurrently running jobs.
        let db = self.pool.clone();
        match processor(job.payload.clone(), ctx, db).await {
            Ok(result) => {
                if let Err(e) = store.mark_succeeded(job_id, &result).await {
                    error!(job_id, error = %e, "failed to record job success");
                }
            }
            Err(job_err) if job_err.retryable && job.attempts < job.max_attempts => {
                let delay = retry_delay(job.attempts);
                warn!(
                    job_id,
                    attempt = job.attempts,
                    delay_secs = delay.as_secs_f64(),
                    error = %job_err,
                    "transient failure; re-enqueueing"
                );
                if store.requeue(job_id, &job_err.message).await.is_ok() {
                    let client = self.client.clone();
                    let task_name = job.task_name.clone();
                    let job_id = job_id.to_string();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Err(e) = client.push(&task_name, &job_id).await {
                            error!(job_id, error = %e, "failed to re-enqueue retry");
                        }
                    });
                }
            }
            Err(job_err) => {
                warn!(job_id, error = %job_err, "job failed terminally");
                let _ = store.mark_failed(job_id, &job_err.message).await;
            }
        }
    }
}

/// `min_delay × 2^(attempt−1)`, jittered ±20 %, capped at `max_delay`.
fn retry_delay(attempt: i64) -> Duration {
    let exponent = (attempt - 1).clamp(0, 16) as u32;
    let base = MIN_RETRY_DELAY.as_secs_f64() * 2f64.powi(exponent as i32);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_secs_f64((base * jitter).min(MAX_RETRY_DELAY.as_secs_f64()))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_exponentially() {
        // Strip jitter by sampling ranges: attempt 1 ∈ [4,6]s, attempt 2 ∈
        // [8,12]s, attempt 3 ∈ [16,24]s.
        for _ in 0..50 {
            let d1 = retry_delay(1).as_secs_f64();
            let d2 = retry_delay(2).as_secs_f64();
            let d3 = retry_delay(3).as_secs_f64();
            assert!((4.0..=6.0).contains(&d1), "{d1}");
            assert!((8.0..=12.0).contains(&d2), "{d2}");
            assert!((16.0..=24.0).contains(&d3), "{d3}");
        }
    }

    #[test]
    fn retry_delay_caps_at_max() {
        for _ in 0..50 {
            assert!(retry_delay(30) <= MAX_RETRY_DELAY);
        }
    }

    #[test]
    fn retry_delay_handles_zero_attempt() {
        // Attempt 0 clamps to the first backoff step.
        let d = retry_delay(0).as_secs_f64();
        assert!((4.0..=6.0).contains(&d), "{d}");
    }
}
