// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Persistent user context and system-prompt assembly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;

use parley_store::UserContextStore;
use parley_tools::builtin::{ContextSink, DocumentHit, DocumentSearcher};

use crate::locks::{LockManager, NS_USER_CONTEXT};

const CONTEXT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-user persistent context with deep-merge updates serialized under the
/// `user_context` lock.
#[derive(Clone)]
pub struct UserContextProvider {
    pool: SqlitePool,
    locks: Arc<LockManager>,
}

impl UserContextProvider {
    pub fn new(pool: SqlitePool, locks: Arc<LockManager>) -> Self {
        Self { pool, locks }
    }

    pub async fn load(&self, user_id: &str) -> anyhow::Result<Option<Value>> {
        Ok(UserContextStore::new(&self.pool).get(user_id).await?)
    }

    /// Deep-merge `updates` into the stored context.  The read-merge-write
    /// is protected by the per-user lock so concurrent agents cannot lose
    /// each other's updates.
    pub async fn update(
        &self,
        user_id: &str,
        updates: &Value,
        reason: &str,
    ) -> anyhow::Result<Value> {
        let _guard = self
            .locks
            .acquire(NS_USER_CONTEXT, user_id, Some(CONTEXT_LOCK_TIMEOUT))
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(UserContextStore::new(&self.pool).update(user_id, updates, reason).await?)
    }

    pub async fn delete(&self, user_id: &str) -> anyhow::Result<bool> {
        let _guard = self
            .locks
            .acquire(NS_USER_CONTEXT, user_id, Some(CONTEXT_LOCK_TIMEOUT))
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(UserContextStore::new(&self.pool).delete(user_id).await?)
    }
}

/// Binds the context provider to one user so the `update_context` tool can
/// write without knowing who is talking.
pub struct UserContextSink {
    provider: UserContextProvider,
    user_id: String,
}

impl UserContextSink {
    pub fn new(provider: UserContextProvider, user_id: impl Into<String>) -> Self {
        Self { provider, user_id: user_id.into() }
    }
}

#[async_trait]
impl ContextSink for UserContextSink {
    async fn apply(&self, updates: Value, reason: &str) -> Result<Value, String> {
        self.provider.update(&self.user_id, &updates, reason).await.map_err(|e| e.to_string())
    }
}

/// Binds document search to one user's scope and an embedder, for the
/// `search_documents` tool.
pub struct ScopedDocumentSearcher {
    pool: SqlitePool,
    user: parley_store::CurrentUser,
    embedder: Arc<dyn parley_model::embeddings::Embedder>,
    min_score: f32,
}

impl ScopedDocumentSearcher {
    pub fn new(
        pool: SqlitePool,
        user: parley_store::CurrentUser,
        embedder: Arc<dyn parley_model::embeddings::Embedder>,
    ) -> Self {
        Self { pool, user, embedder, min_score: 0.3 }
    }
}

#[async_trait]
impl DocumentSearcher for ScopedDocumentSearcher {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<DocumentHit>, String> {
        let vector = self.embedder.embed(query).await.map_err(|e| e.to_string())?;
        let hits = parley_store::DocumentStore::new(&self.pool)
            .search(&self.user, &vector, top_k, self.min_score)
            .await
            .map_err(|e| e.to_string())?;
        Ok(hits
            .into_iter()
            .map(|h| DocumentHit {
                document_id: h.document_id,
                filename: h.filename,
                snippet: h.content,
                score: h.score,
            })
            .collect())
    }
}

// ─── System prompt assembly ───────────────────────────────────────────────────

/// Render the compiled system prompt: agent base prompt, the user's stored
/// context, optional retrieved snippets, and per-request directives.
pub fn render_system_prompt(
    base_prompt: &str,
    user_context: Option<&Value>,
    context_schema: Option<&Value>,
    document_snippets: &[String],
    stick_to_facts: bool,
    objective_responses: bool,
) -> String {
    let mut out = base_prompt.trim_end().to_string();

    if let Some(ctx) = user_context.filter(|v| v.as_object().map(|m| !m.is_empty()).unwrap_or(false))
    {
        out.push_str("\n\n## What you know about this user\n");
        render_context_block(&mut out, ctx, context_schema, 0);
    }

    if !document_snippets.is_empty() {
        out.push_str("\n\n## Relevant documents\n");
        for snippet in document_snippets {
            out.push_str("- ");
            out.push_str(snippet);
            out.push('\n');
        }
    }

    if stick_to_facts {
        out.push_str(
            "\n\nStick to verifiable facts. When you are not certain, say so instead of guessing.",
        );
    }
    if objective_responses {
        out.push_str(
            "\nKeep responses objective and neutral; do not editorialize or add opinions.",
        );
    }
    out
}

fn render_context_block(out: &mut String, ctx: &Value, schema: Option<&Value>, depth: usize) {
    let Some(map) = ctx.as_object() else {
        out.push_str(&ctx.to_string());
        out.push('\n');
        return;
    };
    for (key, value) in map {
        for _ in 0..depth {
            out.push_str("  ");
        }
        out.push_str("- ");
        out.push_str(key);
        // A schema entry describes what the key means to the model.
        if let Some(desc) = schema
            .and_then(|s| s.get(key))
            .and_then(|v| v.as_str())
            .filter(|d| !d.is_empty())
        {
            out.push_str(" (");
            out.push_str(desc);
            out.push(')');
        }
        out.push_str(": ");
        match value {
            Value::Object(_) => {
                out.push('\n');
                render_context_block(out, value, None, depth + 1);
            }
            Value::String(s) => {
                out.push_str(s);
                out.push('\n');
            }
            other => {
                out.push_str(&other.to_string());
                out.push('\n');
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
