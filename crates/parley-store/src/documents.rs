// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::{
    authz::{
        document_scope, is_admin, is_workspace_member, validate_document_visibility, CurrentUser,
    },
    db::{new_id, now},
    error::{StoreError, StoreResult},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub agent_id: Option<String>,
    pub workspace_id: Option<String>,
    pub filename: String,
    pub content_type: Option<String>,
    pub size: i64,
    pub chunk_count: i64,
    pub status: String,
    pub error: Option<String>,
    pub metadata: Value,
    pub created_at: String,
    pub updated_at: String,
}

impl Document {
    fn from_row(row: &SqliteRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            agent_id: row.try_get("agent_id")?,
            workspace_id: row.try_get("workspace_id")?,
            filename: row.try_get("filename")?,
            content_type: row.try_get("content_type")?,
            size: row.try_get::<Option<i64>, _>("size")?.unwrap_or(0),
            chunk_count: row.try_get("chunk_count")?,
            status: row.try_get("status")?,
            error: row.try_get("error")?,
            metadata: row
                .try_get::<Option<String>, _>("metadata")?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(Value::Object(Default::default())),
            created_at: row.try_get::<Option<String>, _>("created_at")?.unwrap_or_default(),
            updated_at: row.try_get::<Option<String>, _>("updated_at")?.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DocumentCreate {
    pub agent_id: Option<String>,
    pub workspace_id: Option<String>,
    pub filename: String,
    pub content_type: Option<String>,
    pub size: i64,
}

#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// One search result: a chunk plus its source document.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkHit {
    pub document_id: String,
    pub filename: String,
    pub chunk_index: i64,
    pub content: String,
    pub score: f32,
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

pub struct DocumentStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DocumentStore<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a document record in `pending` state.
    ///
    /// The visibility tri-state is validated BEFORE the insert: an invalid
    /// combination writes nothing.
    pub async fn create(&self, input: DocumentCreate, user: &CurrentUser) -> StoreResult<Document> {
        validate_document_visibility(
            input.workspace_id.as_deref(),
            input.agent_id.as_deref(),
            user,
        )?;
        if let Some(ws) = &input.workspace_id {
            if !is_admin(user) && !is_workspace_member(self.pool, ws, &user.id).await? {
                return Err(StoreError::Forbidden(format!("not a member of workspace {ws}")));
            }
        }

        let id = new_id();
        let ts = now();
        sqlx::query(
            "INSERT INTO documents (id, agent_id, workspace_id, filename, content_type,
                 size, chunk_count, status, metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 0, 'pending', '{}', ?, ?)",
        )
        .bind(&id)
        .bind(&input.agent_id)
        .bind(&input.workspace_id)
        .bind(&input.filename)
        .bind(&input.content_type)
        .bind(input.size)
        .bind(&ts)
        .bind(&ts)
        .execute(self.pool)
        .await?;

        Ok(Document {
            id,
            agent_id: input.agent_id,
            workspace_id: input.workspace_id,
            filename: input.filename,
            content_type: input.content_type,
            size: input.size,
            chunk_count: 0,
            status: "pending".into(),
            error: None,
            metadata: Value::Object(Default::default()),
            created_at: ts.clone(),
            updated_at: ts,
        })
    }

    pub async fn get(&self, document_id: &str, user: &CurrentUser) -> StoreResult<Option<Document>> {
        let scope = document_scope(self.pool, user).await?;
        let sql = format!(
            "SELECT * FROM documents WHERE id = ? AND deleted_at IS NULL AND {}",
            scope.clause
        );
        let mut query = sqlx::query(&sql).bind(document_id);
        for p in &scope.params {
            query = query.bind(p);
        }
        match query.fetch_optional(self.pool).await? {
            Some(row) => Ok(Some(Document::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list(&self, user: &CurrentUser, limit: i64) -> StoreResult<Vec<Document>> {
        let scope = document_scope(self.pool, user).await?;
        let sql = format!(
            "SELECT * FROM documents WHERE deleted_at IS NULL AND {}
             ORDER BY created_at DESC LIMIT ?",
            scope.clause
        );
        let mut query = sqlx::query(&sql);
        for p in &scope.params {
            query = query.bind(p);
        }
        let rows = query.bind(limit).fetch_all(self.pool).await?;
        rows.iter().map(Document::from_row).collect()
    }

    /// Ingestion status transition (`pending → processing → ready|failed`).
    /// Not scope-checked: the ingest worker owns the document id it was
    /// handed by the enqueue path.
    pub async fn set_status(
        &self,
        document_id: &str,
        status: &str,
        error: Option<&str>,
        chunk_count: Option<i64>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE documents SET status = ?, error = ?,
                 chunk_count = COALESCE(?, chunk_count),
                 processed_at = CASE WHEN ? IN ('ready', 'failed') THEN ? ELSE processed_at END,
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(status)
        .bind(error)
        .bind(chunk_count)
        .bind(status)
        .bind(now())
        .bind(now())
        .bind(document_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, document_id: &str, user: &CurrentUser) -> StoreResult<bool> {
        let scope = document_scope(self.pool, user).await?;
        let sql = format!(
            "UPDATE documents SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL AND {}",
            scope.clause
        );
        let mut query = sqlx::query(&sql).bind(now()).bind(document_id);
        for p in &scope.params {
            query = query.bind(p);
        }
        Ok(query.execute(self.pool).await?.rows_affected() > 0)
    }

    /// Replace the chunk set for a document (idempotent re-ingestion).
    pub async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: &[NewChunk],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        for chunk in chunks {
            sqlx::query(
                "INSERT INTO document_chunks
                     (id, document_id, chunk_index, content, embedding, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(new_id())
            .bind(document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(serde_json::to_string(&chunk.embedding).unwrap_or_else(|_| "[]".into()))
            .bind(now())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn chunks(&self, document_id: &str) -> StoreResult<Vec<DocumentChunk>> {
        let rows = sqlx::query(
            "SELECT * FROM document_chunks WHERE document_id = ? ORDER BY chunk_index",
        )
        .bind(document_id)
        .fetch_all(self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(DocumentChunk {
                    id: row.try_get("id")?,
                    document_id: row.try_get("document_id")?,
                    chunk_index: row.try_get("chunk_index")?,
                    content: row.try_get("content")?,
                    embedding: row
                        .try_get::<Option<String>, _>("embedding")?
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Vector search across every READY document the user can see.
    ///
    /// Candidate chunks are constrained by the document scope in SQL; the
    /// similarity ranking happens here over the parsed embeddings.
    pub async fn search(
        &self,
        user: &CurrentUser,
        query_embedding: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> StoreResult<Vec<ChunkHit>> {
        let scope = document_scope(self.pool, user).await?;
        let sql = format!(
            "SELECT c.document_id, c.chunk_index, c.content, c.embedding, d.filename
             FROM document_chunks c
             JOIN documents d ON d.id = c.document_id
             WHERE d.deleted_at IS NULL AND d.status = 'ready' AND {}",
            scope.clause
        );
        let mut query = sqlx::query(&sql);
        for p in &scope.params {
            query = query.bind(p);
        }
        let rows = query.fetch_all(self.pool).await?;

        let mut hits: Vec<ChunkHit> = rows
            .iter()
            .filter_map(|row| {
                let embedding: Vec<f32> = row
                    .try_get::<Option<String>, _>("embedding")
                    .ok()?
                    .and_then(|s| serde_json::from_str(&s).ok())?;
                let score = cosine(query_embedding, &embedding);
                if score < min_score {
                    return None;
                }
                Some(ChunkHit {
                    document_id: row.try_get("document_id").ok()?,
                    filename: row.try_get("filename").ok()?,
                    chunk_index: row.try_get("chunk_index").ok()?,
                    content: row.try_get("content").ok()?,
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentCreate, AgentStore};
    use crate::db::memory_pool;
    use crate::workspaces::WorkspaceStore;

    fn doc(filename: &str, workspace: Option<&str>, agent: Option<&str>) -> DocumentCreate {
        DocumentCreate {
            agent_id: agent.map(|s| s.to_string()),
            workspace_id: workspace.map(|s| s.to_string()),
            filename: filename.into(),
            content_type: Some("text/plain".into()),
            size: 10,
        }
    }

    #[tokio::test]
    async fn invalid_visibility_writes_no_row() {
        let pool = memory_pool().await.unwrap();
        let store = DocumentStore::new(&pool);
        let err = store
            .create(doc("f.txt", Some("ws"), Some("ag")), &CurrentUser::admin("root"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Visibility(_)));

        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM documents").fetch_one(&pool).await.unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn system_global_create_is_admin_only() {
        let pool = memory_pool().await.unwrap();
        let store = DocumentStore::new(&pool);
        let err = store.create(doc("f.txt", None, None), &CurrentUser::member("u")).await;
        assert!(matches!(err, Err(StoreError::Visibility(_))));
        let d = store.create(doc("f.txt", None, None), &CurrentUser::admin("root")).await.unwrap();
        assert_eq!(d.status, "pending");
        // Global documents are readable by everyone.
        assert!(store.get(&d.id, &CurrentUser::member("u")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn workspace_document_visible_to_members_only() {
        let pool = memory_pool().await.unwrap();
        let alice = CurrentUser::member("alice");
        let ws = WorkspaceStore::new(&pool).create("team", None, &alice).await.unwrap();
        let store = DocumentStore::new(&pool);

        let d = store.create(doc("shared.pdf", Some(&ws.id), None), &alice).await.unwrap();
        assert!(store.get(&d.id, &alice).await.unwrap().is_some());
        assert!(store.get(&d.id, &CurrentUser::member("outsider")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn personal_agent_document_follows_agent_owner() {
        let pool = memory_pool().await.unwrap();
        let alice = CurrentUser::member("alice");
        let agent = AgentStore::new(&pool)
            .create(AgentCreate { name: "a".into(), ..Default::default() }, &alice)
            .await
            .unwrap();
        let store = DocumentStore::new(&pool);

        let d = store.create(doc("mine.txt", None, Some(&agent.id)), &alice).await.unwrap();
        assert!(store.get(&d.id, &alice).await.unwrap().is_some());
        assert!(store.get(&d.id, &CurrentUser::member("bob")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn agent_document_on_shared_agent_is_visible_to_members() {
        let pool = memory_pool().await.unwrap();
        let alice = CurrentUser::member("alice");
        let ws = WorkspaceStore::new(&pool).create("team", None, &alice).await.unwrap();
        WorkspaceStore::new(&pool).add_member(&ws.id, "bob", "member", &alice).await.unwrap();

        // A workspace-shared agent, with a document attached to the agent
        // itself rather than the workspace.
        let agent = AgentStore::new(&pool)
            .create(
                AgentCreate {
                    name: "shared".into(),
                    workspace_id: Some(ws.id.clone()),
                    ..Default::default()
                },
                &alice,
            )
            .await
            .unwrap();
        let store = DocumentStore::new(&pool);
        let d = store.create(doc("kb.txt", None, Some(&agent.id)), &alice).await.unwrap();

        // The document follows the agent's visibility: every member of the
        // agent's workspace can see it, outsiders cannot.
        assert!(store.get(&d.id, &alice).await.unwrap().is_some());
        assert!(store.get(&d.id, &CurrentUser::member("bob")).await.unwrap().is_some());
        assert!(store.get(&d.id, &CurrentUser::member("outsider")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_transitions_stamp_processed_at() {
        let pool = memory_pool().await.unwrap();
        let store = DocumentStore::new(&pool);
        let admin = CurrentUser::admin("root");
        let d = store.create(doc("f.txt", None, None), &admin).await.unwrap();

        store.set_status(&d.id, "processing", None, None).await.unwrap();
        store.set_status(&d.id, "ready", None, Some(3)).await.unwrap();
        let loaded = store.get(&d.id, &admin).await.unwrap().unwrap();
        assert_eq!(loaded.status, "ready");
        assert_eq!(loaded.chunk_count, 3);
    }

    #[tokio::test]
    async fn failed_status_records_error() {
        let pool = memory_pool().await.unwrap();
        let store = DocumentStore::new(&pool);
        let admin = CurrentUser::admin("root");
        let d = store.create(doc("f.txt", None, None), &admin).await.unwrap();
        store.set_status(&d.id, "failed", Some("parser exploded"), None).await.unwrap();
        let loaded = store.get(&d.id, &admin).await.unwrap().unwrap();
        assert_eq!(loaded.status, "failed");
        assert_eq!(loaded.error.as_deref(), Some("parser exploded"));
    }

    #[tokio::test]
    async fn chunks_round_trip_in_order() {
        let pool = memory_pool().await.unwrap();
        let store = DocumentStore::new(&pool);
        let admin = CurrentUser::admin("root");
        let d = store.create(doc("f.txt", None, None), &admin).await.unwrap();

        store
            .replace_chunks(
                &d.id,
                &[
                    NewChunk { chunk_index: 1, content: "second".into(), embedding: vec![0.0, 1.0] },
                    NewChunk { chunk_index: 0, content: "first".into(), embedding: vec![1.0, 0.0] },
                ],
            )
            .await
            .unwrap();
        let chunks = store.chunks(&d.id).await.unwrap();
        assert_eq!(chunks[0].content, "first");
        assert_eq!(chunks[1].content, "second");
        assert_eq!(chunks[0].embedding, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn replace_chunks_is_idempotent() {
        let pool = memory_pool().await.unwrap();
        let store = DocumentStore::new(&pool);
        let admin = CurrentUser::admin("root");
        let d = store.create(doc("f.txt", None, None), &admin).await.unwrap();

        let chunks =
            vec![NewChunk { chunk_index: 0, content: "only".into(), embedding: vec![1.0] }];
        store.replace_chunks(&d.id, &chunks).await.unwrap();
        store.replace_chunks(&d.id, &chunks).await.unwrap();
        assert_eq!(store.chunks(&d.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn search_ranks_by_similarity_and_respects_scope() {
        let pool = memory_pool().await.unwrap();
        let store = DocumentStore::new(&pool);
        let admin = CurrentUser::admin("root");
        let alice = CurrentUser::member("alice");
        let ws = WorkspaceStore::new(&pool).create("team", None, &alice).await.unwrap();

        // One workspace doc for alice's team, one global doc.
        let team_doc = store.create(doc("team.txt", Some(&ws.id), None), &alice).await.unwrap();
        let global_doc = store.create(doc("global.txt", None, None), &admin).await.unwrap();
        store
            .replace_chunks(
                &team_doc.id,
                &[NewChunk { chunk_index: 0, content: "team fact".into(), embedding: vec![1.0, 0.0] }],
            )
            .await
            .unwrap();
        store
            .replace_chunks(
                &global_doc.id,
                &[NewChunk { chunk_index: 0, content: "global fact".into(), embedding: vec![0.6, 0.8] }],
            )
            .await
            .unwrap();
        store.set_status(&team_doc.id, "ready", None, Some(1)).await.unwrap();
        store.set_status(&global_doc.id, "ready", None, Some(1)).await.unwrap();

        let hits = store.search(&alice, &[1.0, 0.0], 10, 0.5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "team fact");
        assert!(hits[0].score > hits[1].score);

        // An outsider only reaches the global document.
        let outsider_hits =
            store.search(&CurrentUser::member("outsider"), &[1.0, 0.0], 10, 0.5).await.unwrap();
        assert_eq!(outsider_hits.len(), 1);
        assert_eq!(outsider_hits[0].content, "global fact");
    }

    #[tokio::test]
    async fn search_skips_pending_documents() {
        let pool = memory_pool().await.unwrap();
        let store = DocumentStore::new(&pool);
        let admin = CurrentUser::admin("root");
        let d = store.create(doc("f.txt", None, None), &admin).await.unwrap();
        store
            .replace_chunks(
                &d.id,
                &[NewChunk { chunk_index: 0, content: "hidden".into(), embedding: vec![1.0] }],
            )
            .await
            .unwrap();
        // Status still 'pending' — not searchable.
        assert!(store.search(&admin, &[1.0], 10, 0.0).await.unwrap().is_empty());
    }
}
