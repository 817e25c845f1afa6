// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Document upload, listing, and vector search.
//!
//! Upload stores the raw file under the upload dir, writes the `pending`
//! document row, and enqueues ingestion (chunk → embed → ready).  Parsing
//! richer formats than text happens upstream of the enqueued payload.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use parley_store::{Document, DocumentCreate, DocumentStore};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppContext,
};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// `POST /documents` — multipart upload with optional `agent_id` /
/// `workspace_id` fields controlling visibility.
pub async fn upload_document(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Document>)> {
    let mut filename = None;
    let mut content_type = None;
    let mut bytes: Option<Vec<u8>> = None;
    let mut agent_id = None;
    let mut workspace_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                content_type = field.content_type().map(|s| s.to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed reading upload: {e}")))?;
                if data.len() as u64 > ctx.settings.max_upload_size {
                    return Err(ApiError::BadRequest(format!(
                        "upload exceeds the {} byte limit",
                        ctx.settings.max_upload_size
                    )));
                }
                bytes = Some(data.to_vec());
            }
            "agent_id" => {
                agent_id = Some(field.text().await.unwrap_or_default()).filter(|s| !s.is_empty());
            }
            "workspace_id" => {
                workspace_id =
                    Some(field.text().await.unwrap_or_default()).filter(|s| !s.is_empty());
            }
            _ => {}
        }
    }

    let bytes = bytes.ok_or_else(|| ApiError::BadRequest("missing 'file' field".into()))?;
    let filename = filename.unwrap_or_else(|| "upload.txt".to_string());

    let jobs = ctx.jobs.as_ref().ok_or_else(|| {
        ApiError::Unavailable("document ingestion requires the job queue (configure Redis)".into())
    })?;

    let document = DocumentStore::new(&ctx.pool)
        .create(
            DocumentCreate {
                agent_id,
                workspace_id,
                filename: filename.clone(),
                content_type,
                size: bytes.len() as i64,
            },
            &user,
        )
        .await?;

    // Keep the original alongside the extracted text.
    let dir = std::path::Path::new(&ctx.settings.upload_dir);
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        return Err(ApiError::Internal(format!("upload dir: {e}")));
    }
    let stored_path = dir.join(format!("{}_{filename}", document.id));
    tokio::fs::write(&stored_path, &bytes)
        .await
        .map_err(|e| ApiError::Internal(format!("writing upload: {e}")))?;

    let content = String::from_utf8_lossy(&bytes).to_string();
    jobs.enqueue(
        "document_ingest",
        json!({ "document_id": document.id, "content": content }),
        Some(&user.id),
        document.workspace_id.as_deref(),
    )
    .await?;

    info!(document_id = %document.id, filename, "document queued for ingestion");
    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn list_documents(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Document>>> {
    Ok(Json(DocumentStore::new(&ctx.pool).list(&user, query.limit).await?))
}

pub async fn get_document(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path(document_id): Path<String>,
) -> ApiResult<Json<Document>> {
    DocumentStore::new(&ctx.pool)
        .get(&document_id, &user)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("document not found: {document_id}")))
}

pub async fn delete_document(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path(document_id): Path<String>,
) -> ApiResult<StatusCode> {
    if DocumentStore::new(&ctx.pool).delete(&document_id, &user).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("document not found: {document_id}")))
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

fn default_top_k() -> usize {
    5
}

fn default_min_score() -> f32 {
    0.3
}

/// `POST /documents/search` — embed the query and rank visible chunks.
pub async fn search_documents(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Json(body): Json<SearchBody>,
) -> ApiResult<Json<Value>> {
    if body.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".into()));
    }
    let embedder = ctx.embedder.as_ref().ok_or_else(|| {
        ApiError::Unavailable("document search requires an embedding model".into())
    })?;

    let vector = embedder.embed(&body.query).await.map_err(ApiError::from)?;
    let hits = DocumentStore::new(&ctx.pool)
        .search(&user, &vector, body.top_k, body.min_score)
        .await?;
    Ok(Json(json!({ "results": hits })))
}
