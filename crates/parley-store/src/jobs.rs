// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Durable job rows.  The queue delivers at-least-once; these rows are the
//! source of truth for job state.  Legal transitions:
//! `queued → running → {succeeded, failed, queued}` (requeue on retry) and
//! `queued → cancelled`.  A terminal row never transitions again.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::{
    db::now,
    error::StoreResult,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub task_name: String,
    pub payload: Value,
    pub status: String,
    pub attempts: i64,
    pub max_attempts: i64,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub user_id: Option<String>,
    pub workspace_id: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl Job {
    fn from_row(row: &SqliteRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            task_name: row.try_get("task_name")?,
            payload: row
                .try_get::<Option<String>, _>("payload")?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(Value::Object(Default::default())),
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            result: row
                .try_get::<Option<String>, _>("result")?
                .and_then(|s| serde_json::from_str(&s).ok()),
            error: row.try_get("error")?,
            user_id: row.try_get("user_id")?,
            workspace_id: row.try_get("workspace_id")?,
            created_at: row.try_get::<Option<String>, _>("created_at")?.unwrap_or_default(),
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

pub struct JobStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> JobStore<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Write the durable record for a freshly enqueued job.
    pub async fn insert_queued(
        &self,
        id: &str,
        task_name: &str,
        payload: &Value,
        max_attempts: i64,
        user_id: Option<&str>,
        workspace_id: Option<&str>,
    ) -> StoreResult<Job> {
        let ts = now();
        sqlx::query(
            "INSERT INTO jobs (id, task_name, payload, status, attempts, max_attempts,
                 user_id, workspace_id, created_at, updated_at)
             VALUES (?, ?, ?, 'queued', 0, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(task_name)
        .bind(payload.to_string())
        .bind(max_attempts)
        .bind(user_id)
        .bind(workspace_id)
        .bind(&ts)
        .bind(&ts)
        .execute(self.pool)
        .await?;

        Ok(Job {
            id: id.to_string(),
            task_name: task_name.to_string(),
            payload: payload.clone(),
            status: "queued".into(),
            attempts: 0,
            max_attempts,
            result: None,
            error: None,
            user_id: user_id.map(|s| s.to_string()),
            workspace_id: workspace_id.map(|s| s.to_string()),
            created_at: ts,
            started_at: None,
            completed_at: None,
        })
    }

    pub async fn get(&self, job_id: &str) -> StoreResult<Option<Job>> {
        match sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(self.pool)
            .await?
        {
            Some(row) => Ok(Some(Job::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Claim a queued job: `queued → running`, attempts += 1.
    ///
    /// Returns the claimed job or `None` when the row is no longer queued —
    /// a cancelled job is skipped this way.
    pub async fn claim(&self, job_id: &str) -> StoreResult<Option<Job>> {
        let ts = now();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'running', attempts = attempts + 1,
                 started_at = ?, updated_at = ?
             WHERE id = ? AND status = 'queued'",
        )
        .bind(&ts)
        .bind(&ts)
        .bind(job_id)
        .execute(self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(job_id).await
    }

    pub async fn mark_succeeded(&self, job_id: &str, result: &Value) -> StoreResult<()> {
        let ts = now();
        sqlx::query(
            "UPDATE jobs SET status = 'succeeded', result = ?, completed_at = ?, updated_at = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(result.to_string())
        .bind(&ts)
        .bind(&ts)
        .bind(job_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, job_id: &str, error: &str) -> StoreResult<()> {
        let ts = now();
        sqlx::query(
            "UPDATE jobs SET status = 'failed', error = ?, completed_at = ?, updated_at = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(error)
        .bind(&ts)
        .bind(&ts)
        .bind(job_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Put a running job back in the queue for a retry attempt.
    pub async fn requeue(&self, job_id: &str, error: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'queued', error = ?, updated_at = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(error)
        .bind(now())
        .bind(job_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Cancel a job that has not started.  Returns `false` once it is
    /// running or terminal — jobs cannot be cancelled mid-execution.
    pub async fn cancel(&self, job_id: &str) -> StoreResult<bool> {
        let ts = now();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'cancelled', completed_at = ?, updated_at = ?
             WHERE id = ? AND status = 'queued'",
        )
        .bind(&ts)
        .bind(&ts)
        .bind(job_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list(
        &self,
        status: Option<&str>,
        task: Option<&str>,
        user_id: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<Job>> {
        let mut sql = String::from("SELECT * FROM jobs WHERE 1=1");
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if task.is_some() {
            sql.push_str(" AND task_name = ?");
        }
        if user_id.is_some() {
            sql.push_str(" AND user_id = ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(s) = status {
            query = query.bind(s);
        }
        if let Some(t) = task {
            query = query.bind(t);
        }
        if let Some(u) = user_id {
            query = query.bind(u);
        }
        let rows = query.bind(limit).fetch_all(self.pool).await?;
        rows.iter().map(Job::from_row).collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
