// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Pool construction and idempotent schema initialization.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::error::StoreResult;

/// Connect a pool for the given sqlx URL.
///
/// In-memory databases are pinned to a single connection — every pooled
/// connection would otherwise see its own empty database.
pub async fn connect(url: &str) -> StoreResult<SqlitePool> {
    // SQLite creates the file but not its directory.
    if let Some(path) = url.strip_prefix("sqlite://") {
        let path = path.split('?').next().unwrap_or(path);
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
    }
    let max = if url.contains(":memory:") { 1 } else { 16 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max)
        .acquire_timeout(std::time::Duration::from_secs(60))
        .connect(url)
        .await?;
    Ok(pool)
}

/// Connect an in-memory database with the schema applied (test helper,
/// also used by `parley init-db --check`).
pub async fn memory_pool() -> StoreResult<SqlitePool> {
    let pool = connect("sqlite::memory:").await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables and indexes.  Safe to call repeatedly.
pub async fn init_schema(pool: &SqlitePool) -> StoreResult<()> {
    let statements: &[&str] = &[
        // ── Workspaces ──────────────────────────────────────────────────────
        "CREATE TABLE IF NOT EXISTS workspaces (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            metadata TEXT DEFAULT '{}',
            created_at TEXT,
            updated_at TEXT,
            deleted_at TEXT
        )",
        "CREATE TABLE IF NOT EXISTS workspace_members (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'member',
            created_at TEXT,
            updated_at TEXT,
            UNIQUE(workspace_id, user_id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_workspace_members_user
            ON workspace_members(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_workspace_members_workspace
            ON workspace_members(workspace_id)",
        // ── Agents ──────────────────────────────────────────────────────────
        "CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            system_prompt TEXT,
            provider TEXT DEFAULT 'anthropic',
            model TEXT DEFAULT 'claude-sonnet-4-20250514',
            premium_provider TEXT,
            premium_model TEXT,
            temperature REAL DEFAULT 0.7,
            max_tokens INTEGER DEFAULT 4096,
            tools TEXT DEFAULT '[]',
            capabilities TEXT DEFAULT '[]',
            context_schema TEXT,
            memory_strategy TEXT DEFAULT 'last_n',
            memory_params TEXT DEFAULT '{\"n\": 20}',
            owner_user_id TEXT,
            workspace_id TEXT,
            metadata TEXT DEFAULT '{}',
            created_at TEXT,
            updated_at TEXT,
            deleted_at TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_agents_owner ON agents(owner_user_id)",
        "CREATE INDEX IF NOT EXISTS idx_agents_workspace ON agents(workspace_id)",
        // ── Threads ─────────────────────────────────────────────────────────
        "CREATE TABLE IF NOT EXISTS threads (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            title TEXT,
            summary TEXT,
            summarized_until_msg_id TEXT,
            turn_count INTEGER DEFAULT 0,
            token_count INTEGER DEFAULT 0,
            owner_user_id TEXT,
            workspace_id TEXT,
            metadata TEXT DEFAULT '{}',
            created_at TEXT,
            updated_at TEXT,
            deleted_at TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_threads_agent ON threads(agent_id)",
        "CREATE INDEX IF NOT EXISTS idx_threads_owner ON threads(owner_user_id)",
        "CREATE INDEX IF NOT EXISTS idx_threads_workspace ON threads(workspace_id)",
        // ── Messages ────────────────────────────────────────────────────────
        "CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            thread_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT,
            tool_calls TEXT,
            tool_call_id TEXT,
            attachments TEXT,
            model TEXT,
            provider TEXT,
            input_tokens INTEGER DEFAULT 0,
            output_tokens INTEGER DEFAULT 0,
            cost REAL DEFAULT 0,
            latency_ms INTEGER DEFAULT 0,
            metadata TEXT DEFAULT '{}',
            created_at TEXT,
            updated_at TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id)",
        "CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at)",
        // ── Documents ───────────────────────────────────────────────────────
        "CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            agent_id TEXT,
            workspace_id TEXT,
            filename TEXT NOT NULL,
            content_type TEXT,
            size INTEGER,
            chunk_count INTEGER DEFAULT 0,
            status TEXT DEFAULT 'pending',
            error TEXT,
            metadata TEXT DEFAULT '{}',
            created_at TEXT,
            updated_at TEXT,
            processed_at TEXT,
            deleted_at TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_documents_agent ON documents(agent_id)",
        "CREATE INDEX IF NOT EXISTS idx_documents_workspace ON documents(workspace_id)",
        "CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)",
        "CREATE TABLE IF NOT EXISTS document_chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            embedding TEXT,
            metadata TEXT DEFAULT '{}',
            created_at TEXT,
            UNIQUE(document_id, chunk_index)
        )",
        "CREATE INDEX IF NOT EXISTS idx_chunks_document ON document_chunks(document_id)",
        // ── User context ────────────────────────────────────────────────────
        "CREATE TABLE IF NOT EXISTS user_context (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            workspace_id TEXT,
            context_type TEXT NOT NULL DEFAULT 'profile',
            content TEXT NOT NULL DEFAULT '{}',
            metadata TEXT DEFAULT '{}',
            last_reason TEXT,
            created_at TEXT,
            updated_at TEXT,
            expires_at TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_user_context_user ON user_context(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_user_context_type ON user_context(context_type)",
        // ── Jobs ────────────────────────────────────────────────────────────
        "CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            task_name TEXT NOT NULL,
            payload TEXT DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'queued',
            attempts INTEGER DEFAULT 0,
            max_attempts INTEGER DEFAULT 3,
            result TEXT,
            error TEXT,
            user_id TEXT,
            workspace_id TEXT,
            created_at TEXT,
            updated_at TEXT,
            started_at TEXT,
            completed_at TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
        "CREATE INDEX IF NOT EXISTS idx_jobs_task ON jobs(task_name)",
        "CREATE INDEX IF NOT EXISTS idx_jobs_user ON jobs(user_id)",
    ];

    for sql in statements {
        sqlx::query(sql).execute(pool).await?;
    }
    info!("database schema initialized");
    Ok(())
}

/// RFC3339 UTC timestamp used for all persisted times.
pub fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Fresh opaque id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
