// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Enqueue side of the job queue, plus the pub/sub publisher the streaming
//! relay uses.
//!
//! Enqueue writes the durable row first, then pushes onto the Redis list
//! keyed by task name.  If the push fails the row is rolled back so a job
//! never exists in the table without a queue entry.

use std::time::Duration;

use redis::{aio::ConnectionManager, AsyncCommands};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use parley_store::{Job, JobStore};
use sqlx::SqlitePool;

const REDIS_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_ATTEMPTS: i64 = 3;

pub fn queue_key(task_name: &str) -> String {
    format!("queue:{task_name}")
}

/// Channel name for async chat streaming: `stream:<thread>:<message>`.
pub fn stream_channel(thread_id: &str, message_id: &str) -> String {
    format!("stream:{thread_id}:{message_id}")
}

#[derive(Debug, Error)]
pub enum JobClientError {
    #[error("queue unavailable: {0}")]
    Queue(String),

    #[error(transparent)]
    Store(#[from] parley_store::StoreError),
}

#[derive(Clone)]
pub struct JobClient {
    pool: SqlitePool,
    redis: ConnectionManager,
}

impl JobClient {
    pub async fn connect(pool: SqlitePool, redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let redis = tokio::time::timeout(REDIS_TIMEOUT, client.get_connection_manager())
            .await
            .map_err(|_| anyhow::anyhow!("timed out connecting to redis"))??;
        Ok(Self { pool, redis })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Enqueue a task: durable row + `LPUSH queue:<task>`.
    pub async fn enqueue(
        &self,
        task_name: &str,
        payload: Value,
        user_id: Option<&str>,
        workspace_id: Option<&str>,
    ) -> Result<Job, JobClientError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let store = JobStore::new(&self.pool);
        let job = store
            .insert_queued(&job_id, task_name, &payload, DEFAULT_MAX_ATTEMPTS, user_id, workspace_id)
            .await?;

        if let Err(e) = self.push(task_name, &job_id).await {
            // Roll back the row so the table never claims a job the queue
            // will not deliver.
            warn!(job_id, error = %e, "queue push failed; rolling back job row");
            let _ = sqlx::query("DELETE FROM jobs WHERE id = ?")
                .bind(&job_id)
                .execute(&self.pool)
                .await;
            return Err(e);
        }

        debug!(job_id, task_name, "job enqueued");
        Ok(job)
    }

    /// Push an existing job id back onto its queue (retry path).
    pub async fn push(&self, task_name: &str, job_id: &str) -> Result<(), JobClientError> {
        let envelope = json!({ "job_id": job_id, "task_name": task_name }).to_string();
        let mut conn = self.redis.clone();
        let push = conn.lpush::<_, _, ()>(queue_key(task_name), envelope);
        tokio::time::timeout(REDIS_TIMEOUT, push)
            .await
            .map_err(|_| JobClientError::Queue("redis push timed out".into()))?
            .map_err(|e| JobClientError::Queue(e.to_string()))?;
        Ok(())
    }

    /// Publish one frame payload to a pub/sub channel.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), JobClientError> {
        let mut conn = self.redis.clone();
        let publish = conn.publish::<_, _, ()>(channel, payload);
        tokio::time::timeout(REDIS_TIMEOUT, publish)
            .await
            .map_err(|_| JobClientError::Queue("redis publish timed out".into()))?
            .map_err(|e| JobClientError::Queue(e.to_string()))?;
        Ok(())
    }

    pub async fn status(&self, job_id: &str) -> Result<Option<Job>, JobClientError> {
        Ok(JobStore::new(&self.pool).get(job_id).await?)
    }

    /// `queued → cancelled` only; running jobs are not interruptible.
    pub async fn cancel(&self, job_id: &str) -> Result<bool, JobClientError> {
        Ok(JobStore::new(&self.pool).cancel(job_id).await?)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_keys_are_per_task() {
        assert_eq!(queue_key("chat_response"), "queue:chat_response");
        assert_ne!(queue_key("a"), queue_key("b"));
    }

    #[test]
    fn stream_channel_shape() {
        assert_eq!(stream_channel("t-1", "m-2"), "stream:t-1:m-2");
    }
}
