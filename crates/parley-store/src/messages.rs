// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Message persistence.  Messages are owned exclusively by their thread:
//! access control happens at the thread boundary, so methods here take a
//! thread id the caller has already resolved under scope.
//!
//! Rows are append-only; only `metadata` may be patched afterwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::{
    db::{new_id, now},
    error::StoreResult,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub role: String,
    pub content: String,
    pub tool_calls: Option<Value>,
    pub tool_call_id: Option<String>,
    pub attachments: Option<Value>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
    pub latency_ms: i64,
    pub metadata: Value,
    pub created_at: String,
}

impl Message {
    fn from_row(row: &SqliteRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            thread_id: row.try_get("thread_id")?,
            role: row.try_get("role")?,
            content: row.try_get::<Option<String>, _>("content")?.unwrap_or_default(),
            tool_calls: row
                .try_get::<Option<String>, _>("tool_calls")?
                .and_then(|s| serde_json::from_str(&s).ok()),
            tool_call_id: row.try_get("tool_call_id")?,
            attachments: row
                .try_get::<Option<String>, _>("attachments")?
                .and_then(|s| serde_json::from_str(&s).ok()),
            model: row.try_get("model")?,
            provider: row.try_get("provider")?,
            input_tokens: row.try_get("input_tokens")?,
            output_tokens: row.try_get("output_tokens")?,
            cost: row.try_get("cost")?,
            latency_ms: row.try_get("latency_ms")?,
            metadata: row
                .try_get::<Option<String>, _>("metadata")?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(Value::Object(Default::default())),
            created_at: row.try_get::<Option<String>, _>("created_at")?.unwrap_or_default(),
        })
    }
}

/// Fields for appending a message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub thread_id: String,
    pub role: String,
    pub content: String,
    pub tool_calls: Option<Value>,
    pub tool_call_id: Option<String>,
    pub attachments: Option<Value>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
    pub latency_ms: i64,
    pub metadata: Value,
}

impl NewMessage {
    pub fn text(thread_id: &str, role: &str, content: &str) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
            attachments: None,
            model: None,
            provider: None,
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            latency_ms: 0,
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn with_tool_calls(mut self, calls: Value) -> Self {
        self.tool_calls = Some(calls);
        self
    }

    pub fn as_tool_result(mut self, tool_call_id: &str) -> Self {
        self.tool_call_id = Some(tool_call_id.to_string());
        self
    }
}

pub struct MessageStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MessageStore<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, msg: NewMessage) -> StoreResult<Message> {
        let id = new_id();
        let ts = now();
        sqlx::query(
            "INSERT INTO messages (id, thread_id, role, content, tool_calls, tool_call_id,
                 attachments, model, provider, input_tokens, output_tokens, cost,
                 latency_ms, metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&msg.thread_id)
        .bind(&msg.role)
        .bind(&msg.content)
        .bind(msg.tool_calls.as_ref().map(|v| v.to_string()))
        .bind(&msg.tool_call_id)
        .bind(msg.attachments.as_ref().map(|v| v.to_string()))
        .bind(&msg.model)
        .bind(&msg.provider)
        .bind(msg.input_tokens)
        .bind(msg.output_tokens)
        .bind(msg.cost)
        .bind(msg.latency_ms)
        .bind(msg.metadata.to_string())
        .bind(&ts)
        .bind(&ts)
        .execute(self.pool)
        .await?;

        Ok(Message {
            id,
            thread_id: msg.thread_id,
            role: msg.role,
            content: msg.content,
            tool_calls: msg.tool_calls,
            tool_call_id: msg.tool_call_id,
            attachments: msg.attachments,
            model: msg.model,
            provider: msg.provider,
            input_tokens: msg.input_tokens,
            output_tokens: msg.output_tokens,
            cost: msg.cost,
            latency_ms: msg.latency_ms,
            metadata: msg.metadata,
            created_at: ts,
        })
    }

    /// Messages in append order.  `created_at` collisions (same-millisecond
    /// appends within one turn) are broken by insertion rowid.
    pub async fn list(&self, thread_id: &str, limit: i64) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE thread_id = ?
             ORDER BY created_at ASC, rowid ASC LIMIT ?",
        )
        .bind(thread_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(Message::from_row).collect()
    }

    pub async fn get(&self, message_id: &str) -> StoreResult<Option<Message>> {
        match sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(message_id)
            .fetch_optional(self.pool)
            .await?
        {
            Some(row) => Ok(Some(Message::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Messages after the summary watermark, excluding the trailing
    /// `keep_recent` records that stay in full detail.
    pub async fn unsummarized(
        &self,
        thread_id: &str,
        after_msg_id: Option<&str>,
        keep_recent: usize,
    ) -> StoreResult<Vec<Message>> {
        let all = self.list(thread_id, i64::MAX).await?;
        let start = match after_msg_id {
            Some(mark) => match all.iter().position(|m| m.id == mark) {
                Some(i) => i + 1,
                // Unknown watermark: treat everything as unsummarized.
                None => 0,
            },
            None => 0,
        };
        let end = all.len().saturating_sub(keep_recent);
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(all[start..end].to_vec())
    }

    /// Shallow-merge a patch into the message's metadata.  The only
    /// permitted post-append mutation.
    pub async fn patch_metadata(&self, message_id: &str, patch: &Value) -> StoreResult<bool> {
        let Some(msg) = self.get(message_id).await? else {
            return Ok(false);
        };
        let mut metadata = msg.metadata;
        if let (Value::Object(base), Value::Object(additions)) = (&mut metadata, patch) {
            for (k, v) in additions {
                base.insert(k.clone(), v.clone());
            }
        }
        sqlx::query("UPDATE messages SET metadata = ?, updated_at = ? WHERE id = ?")
            .bind(metadata.to_string())
            .bind(now())
            .bind(message_id)
            .execute(self.pool)
            .await?;
        Ok(true)
    }

    /// Hard delete.  Reserved for the async-enqueue rollback path and admin
    /// flows; normal operation never removes messages.
    pub async fn delete(&self, message_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(message_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
