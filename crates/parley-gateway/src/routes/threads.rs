// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use parley_store::{Thread, ThreadStore};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppContext,
};

#[derive(Debug, Deserialize)]
pub struct ThreadCreate {
    pub agent_id: String,
    pub workspace_id: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ThreadUpdate {
    pub title: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ThreadListQuery {
    pub agent_id: Option<String>,
    pub workspace_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn create_thread(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Json(input): Json<ThreadCreate>,
) -> ApiResult<(StatusCode, Json<Thread>)> {
    let thread = ThreadStore::new(&ctx.pool)
        .create(
            &input.agent_id,
            &user,
            input.workspace_id.as_deref(),
            input.title.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(thread)))
}

pub async fn list_threads(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Query(query): Query<ThreadListQuery>,
) -> ApiResult<Json<Vec<Thread>>> {
    Ok(Json(
        ThreadStore::new(&ctx.pool)
            .list(
                &user,
                query.agent_id.as_deref(),
                query.workspace_id.as_deref(),
                query.limit,
            )
            .await?,
    ))
}

pub async fn get_thread(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<Thread>> {
    ThreadStore::new(&ctx.pool)
        .get(&thread_id, &user)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("thread not found: {thread_id}")))
}

pub async fn update_thread(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path(thread_id): Path<String>,
    Json(input): Json<ThreadUpdate>,
) -> ApiResult<Json<Thread>> {
    // Metadata patches serialize with in-flight turns on the same thread.
    let _guard = ctx
        .locks
        .acquire(
            parley_core::NS_THREAD,
            &thread_id,
            Some(std::time::Duration::from_secs(30)),
        )
        .await
        .map_err(|_| ApiError::Unavailable("thread busy".into()))?;
    ThreadStore::new(&ctx.pool)
        .update(&thread_id, &user, input.title.as_deref(), input.metadata.as_ref())
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("thread not found: {thread_id}")))
}

pub async fn delete_thread(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path(thread_id): Path<String>,
) -> ApiResult<StatusCode> {
    if ThreadStore::new(&ctx.pool).delete(&thread_id, &user).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("thread not found: {thread_id}")))
    }
}

/// Branch the conversation: the caller gets their own copy of the full
/// message history to continue independently.
pub async fn fork_thread(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path(thread_id): Path<String>,
) -> ApiResult<(StatusCode, Json<Thread>)> {
    ThreadStore::new(&ctx.pool)
        .fork(&thread_id, &user)
        .await?
        .map(|t| (StatusCode::CREATED, Json(t)))
        .ok_or_else(|| ApiError::NotFound(format!("thread not found: {thread_id}")))
}
