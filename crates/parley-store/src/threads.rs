// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::{
    agents::AgentStore,
    authz::{thread_scope, CurrentUser},
    db::{new_id, now},
    error::{StoreError, StoreResult},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub agent_id: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub summarized_until_msg_id: Option<String>,
    pub turn_count: i64,
    pub token_count: i64,
    pub owner_user_id: Option<String>,
    pub workspace_id: Option<String>,
    pub metadata: Value,
    pub created_at: String,
    pub updated_at: String,
}

impl Thread {
    fn from_row(row: &SqliteRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            agent_id: row.try_get("agent_id")?,
            title: row.try_get("title")?,
            summary: row.try_get("summary")?,
            summarized_until_msg_id: row.try_get("summarized_until_msg_id")?,
            turn_count: row.try_get("turn_count")?,
            token_count: row.try_get("token_count")?,
            owner_user_id: row.try_get("owner_user_id")?,
            workspace_id: row.try_get("workspace_id")?,
            metadata: row
                .try_get::<Option<String>, _>("metadata")?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(Value::Object(Default::default())),
            created_at: row.try_get::<Option<String>, _>("created_at")?.unwrap_or_default(),
            updated_at: row.try_get::<Option<String>, _>("updated_at")?.unwrap_or_default(),
        })
    }
}

pub struct ThreadStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ThreadStore<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a thread against an agent the caller can see.
    ///
    /// The thread inherits the agent's workspace; an explicit `workspace_id`
    /// must match it.  The creating user always becomes `owner_user_id`.
    pub async fn create(
        &self,
        agent_id: &str,
        user: &CurrentUser,
        workspace_id: Option<&str>,
        title: Option<&str>,
    ) -> StoreResult<Thread> {
        let Some(agent) = AgentStore::new(self.pool).get(agent_id, user).await? else {
            return Err(StoreError::InvalidReference(format!("agent not found: {agent_id}")));
        };

        let effective_workspace = match (workspace_id, agent.workspace_id.as_deref()) {
            (Some(requested), Some(agents_ws)) if requested != agents_ws => {
                return Err(StoreError::InvalidReference(
                    "thread workspace must match the agent's workspace".into(),
                ));
            }
            (Some(requested), None) => {
                // Personal agent: a workspace thread against it is only valid
                // for the agent's owner.
                if agent.owner_user_id.as_deref() != Some(user.id.as_str()) {
                    return Err(StoreError::InvalidReference(
                        "cannot open a workspace thread on someone else's personal agent".into(),
                    ));
                }
                Some(requested.to_string())
            }
            (_, agents_ws) => agents_ws.map(|s| s.to_string()),
        };

        let id = new_id();
        let ts = now();
        sqlx::query(
            "INSERT INTO threads (id, agent_id, title, turn_count, token_count,
                 owner_user_id, workspace_id, metadata, created_at, updated_at)
             VALUES (?, ?, ?, 0, 0, ?, ?, '{}', ?, ?)",
        )
        .bind(&id)
        .bind(agent_id)
        .bind(title)
        .bind(&user.id)
        .bind(&effective_workspace)
        .bind(&ts)
        .bind(&ts)
        .execute(self.pool)
        .await?;

        Ok(Thread {
            id,
            agent_id: agent_id.to_string(),
            title: title.map(|s| s.to_string()),
            summary: None,
            summarized_until_msg_id: None,
            turn_count: 0,
            token_count: 0,
            owner_user_id: Some(user.id.clone()),
            workspace_id: effective_workspace,
            metadata: Value::Object(Default::default()),
            created_at: ts.clone(),
            updated_at: ts,
        })
    }

    /// Unscoped fetch for background workers operating on a thread id that
    /// was authorized when its job was enqueued.
    pub async fn get_unscoped(&self, thread_id: &str) -> StoreResult<Option<Thread>> {
        match sqlx::query("SELECT * FROM threads WHERE id = ? AND deleted_at IS NULL")
            .bind(thread_id)
            .fetch_optional(self.pool)
            .await?
        {
            Some(row) => Ok(Some(Thread::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get(&self, thread_id: &str, user: &CurrentUser) -> StoreResult<Option<Thread>> {
        let scope = thread_scope(self.pool, user).await?;
        let sql = format!(
            "SELECT * FROM threads WHERE id = ? AND deleted_at IS NULL AND {}",
            scope.clause
        );
        let mut query = sqlx::query(&sql).bind(thread_id);
        for p in &scope.params {
            query = query.bind(p);
        }
        match query.fetch_optional(self.pool).await? {
            Some(row) => Ok(Some(Thread::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list(
        &self,
        user: &CurrentUser,
        agent_id: Option<&str>,
        workspace_id: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<Thread>> {
        let scope = thread_scope(self.pool, user).await?;
        let mut sql = format!(
            "SELECT * FROM threads WHERE deleted_at IS NULL AND {}",
            scope.clause
        );
        if agent_id.is_some() {
            sql.push_str(" AND agent_id = ?");
        }
        if workspace_id.is_some() {
            sql.push_str(" AND workspace_id = ?");
        }
        sql.push_str(" ORDER BY updated_at DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        for p in &scope.params {
            query = query.bind(p);
        }
        if let Some(a) = agent_id {
            query = query.bind(a);
        }
        if let Some(w) = workspace_id {
            query = query.bind(w);
        }
        let rows = query.bind(limit).fetch_all(self.pool).await?;
        rows.iter().map(Thread::from_row).collect()
    }

    /// Patch title/metadata.  Returns the updated row, `None` out of scope.
    pub async fn update(
        &self,
        thread_id: &str,
        user: &CurrentUser,
        title: Option<&str>,
        metadata: Option<&Value>,
    ) -> StoreResult<Option<Thread>> {
        let Some(mut thread) = self.get(thread_id, user).await? else {
            return Ok(None);
        };
        if let Some(t) = title {
            thread.title = Some(t.to_string());
        }
        if let Some(m) = metadata {
            thread.metadata = m.clone();
        }
        thread.updated_at = now();
        sqlx::query("UPDATE threads SET title = ?, metadata = ?, updated_at = ? WHERE id = ?")
            .bind(&thread.title)
            .bind(thread.metadata.to_string())
            .bind(&thread.updated_at)
            .bind(thread_id)
            .execute(self.pool)
            .await?;
        Ok(Some(thread))
    }

    /// Record a completed turn: bump `turn_count`, accumulate tokens.
    pub async fn record_turn(&self, thread_id: &str, tokens: i64) -> StoreResult<()> {
        sqlx::query(
            "UPDATE threads SET turn_count = turn_count + 1,
                 token_count = token_count + ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(tokens)
        .bind(now())
        .bind(thread_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Advance the rolling-summary watermark.  Compared against the current
    /// value so concurrent summarization jobs stay idempotent.
    pub async fn set_summary(
        &self,
        thread_id: &str,
        summary: &str,
        summarized_until_msg_id: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE threads SET summary = ?, summarized_until_msg_id = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(summary)
        .bind(summarized_until_msg_id)
        .bind(now())
        .bind(thread_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, thread_id: &str, user: &CurrentUser) -> StoreResult<bool> {
        let scope = thread_scope(self.pool, user).await?;
        let sql = format!(
            "UPDATE threads SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL AND {}",
            scope.clause
        );
        let mut query = sqlx::query(&sql).bind(now()).bind(thread_id);
        for p in &scope.params {
            query = query.bind(p);
        }
        Ok(query.execute(self.pool).await?.rows_affected() > 0)
    }

    /// Branch a conversation: a new thread for the caller with a copy of
    /// every message.  Copied messages get fresh ids, so the summary
    /// watermark is cleared and the summarization job will rebuild it.
    pub async fn fork(&self, thread_id: &str, user: &CurrentUser) -> StoreResult<Option<Thread>> {
        let Some(source) = self.get(thread_id, user).await? else {
            return Ok(None);
        };

        let id = new_id();
        let ts = now();
        let title = source.title.map(|t| format!("{t} (fork)"));
        sqlx::query(
            "INSERT INTO threads (id, agent_id, title, summary, turn_count, token_count,
                 owner_user_id, workspace_id, metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&source.agent_id)
        .bind(&title)
        .bind(&source.summary)
        .bind(source.turn_count)
        .bind(source.token_count)
        .bind(&user.id)
        .bind(&source.workspace_id)
        .bind(source.metadata.to_string())
        .bind(&ts)
        .bind(&ts)
        .execute(self.pool)
        .await?;

        sqlx::query(
            "INSERT INTO messages (id, thread_id, role, content, tool_calls, tool_call_id,
                 attachments, model, provider, input_tokens, output_tokens, cost,
                 latency_ms, metadata, created_at, updated_at)
             SELECT lower(hex(randomblob(16))), ?, role, content, tool_calls, tool_call_id,
                 attachments, model, provider, input_tokens, output_tokens, cost,
                 latency_ms, metadata, created_at, updated_at
             FROM messages WHERE thread_id = ? ORDER BY created_at",
        )
        .bind(&id)
        .bind(thread_id)
        .execute(self.pool)
        .await?;

        self.get(&id, user).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
