// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Read-side aggregates over the message audit columns.  Every query joins
//! through the thread scope, so users only ever aggregate over
//! conversations they could open directly.

use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::{
    authz::{agent_scope, thread_scope, CurrentUser},
    error::StoreResult,
};

#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub agent_count: i64,
    pub thread_count: i64,
    pub message_count: i64,
    pub total_cost: f64,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageBucket {
    pub date: String,
    pub cost: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub message_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmCall {
    pub message_id: String,
    pub thread_id: String,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
    pub latency_ms: i64,
    pub created_at: String,
}

/// Aggregation window for usage breakdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Day,
    Week,
    Month,
}

impl Period {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "day" => Some(Period::Day),
            "week" => Some(Period::Week),
            "month" => Some(Period::Month),
            _ => None,
        }
    }

    fn cutoff(&self) -> String {
        let days = match self {
            Period::Day => 1,
            Period::Week => 7,
            Period::Month => 30,
        };
        (chrono::Utc::now() - chrono::Duration::days(days)).to_rfc3339()
    }
}

pub struct AnalyticsStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AnalyticsStore<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn metrics(&self, user: &CurrentUser) -> StoreResult<Metrics> {
        let t_scope = thread_scope(self.pool, user).await?;
        let a_scope = agent_scope(self.pool, user).await?;

        let sql = format!(
            "SELECT COUNT(*) AS n FROM agents WHERE deleted_at IS NULL AND {}",
            a_scope.clause
        );
        let mut q = sqlx::query(&sql);
        for p in &a_scope.params {
            q = q.bind(p);
        }
        let agent_count: i64 = q.fetch_one(self.pool).await?.try_get("n")?;

        let sql = format!(
            "SELECT COUNT(*) AS n FROM threads WHERE deleted_at IS NULL AND {}",
            t_scope.clause
        );
        let mut q = sqlx::query(&sql);
        for p in &t_scope.params {
            q = q.bind(p);
        }
        let thread_count: i64 = q.fetch_one(self.pool).await?.try_get("n")?;

        let sql = format!(
            "SELECT COUNT(*) AS n, COALESCE(SUM(m.cost), 0) AS cost,
                    COALESCE(SUM(m.input_tokens), 0) AS input,
                    COALESCE(SUM(m.output_tokens), 0) AS output
             FROM messages m JOIN threads t ON t.id = m.thread_id
             WHERE t.deleted_at IS NULL AND {}",
            t_scope.clause
        );
        let mut q = sqlx::query(&sql);
        for p in &t_scope.params {
            q = q.bind(p);
        }
        let row = q.fetch_one(self.pool).await?;

        Ok(Metrics {
            agent_count,
            thread_count,
            message_count: row.try_get("n")?,
            total_cost: row.try_get("cost")?,
            total_input_tokens: row.try_get("input")?,
            total_output_tokens: row.try_get("output")?,
        })
    }

    /// Per-day cost breakdown for the selected window.
    pub async fn usage(&self, user: &CurrentUser, period: Period) -> StoreResult<Vec<UsageBucket>> {
        let scope = thread_scope(self.pool, user).await?;
        let sql = format!(
            "SELECT substr(m.created_at, 1, 10) AS day,
                    COALESCE(SUM(m.cost), 0) AS cost,
                    COALESCE(SUM(m.input_tokens), 0) AS input,
                    COALESCE(SUM(m.output_tokens), 0) AS output,
                    COUNT(*) AS n
             FROM messages m JOIN threads t ON t.id = m.thread_id
             WHERE t.deleted_at IS NULL AND m.created_at >= ? AND {}
             GROUP BY day ORDER BY day",
            scope.clause
        );
        let mut q = sqlx::query(&sql).bind(period.cutoff());
        for p in &scope.params {
            q = q.bind(p);
        }
        let rows = q.fetch_all(self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(UsageBucket {
                    date: row.try_get("day")?,
                    cost: row.try_get("cost")?,
                    input_tokens: row.try_get("input")?,
                    output_tokens: row.try_get("output")?,
                    message_count: row.try_get("n")?,
                })
            })
            .collect()
    }

    /// The audit log: every assistant completion with its model and cost.
    pub async fn llm_calls(&self, user: &CurrentUser, limit: i64) -> StoreResult<Vec<LlmCall>> {
        let scope = thread_scope(self.pool, user).await?;
        let sql = format!(
            "SELECT m.id, m.thread_id, m.model, m.provider, m.input_tokens,
                    m.output_tokens, m.cost, m.latency_ms, m.created_at
             FROM messages m JOIN threads t ON t.id = m.thread_id
             WHERE t.deleted_at IS NULL AND m.role = 'assistant'
               AND m.model IS NOT NULL AND {}
             ORDER BY m.created_at DESC LIMIT ?",
            scope.clause
        );
        let mut q = sqlx::query(&sql);
        for p in &scope.params {
            q = q.bind(p);
        }
        let rows = q.bind(limit).fetch_all(self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(LlmCall {
                    message_id: row.try_get("id")?,
                    thread_id: row.try_get("thread_id")?,
                    model: row.try_get("model")?,
                    provider: row.try_get("provider")?,
                    input_tokens: row.try_get("input_tokens")?,
                    output_tokens: row.try_get("output_tokens")?,
                    cost: row.try_get("cost")?,
                    latency_ms: row.try_get("latency_ms")?,
                    created_at: row.try_get::<Option<String>, _>("created_at")?.unwrap_or_default(),
                })
            })
            .collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
