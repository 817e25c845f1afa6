// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use parley_store::{authz::is_admin, JobStore};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppContext,
};

/// Poll a job.  Non-admins only see their own jobs — indistinguishable
/// from a missing id.
pub async fn get_job(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let job = JobStore::new(&ctx.pool)
        .get(&job_id)
        .await?
        .filter(|j| is_admin(&user) || j.user_id.as_deref() == Some(user.id.as_str()))
        .ok_or_else(|| ApiError::NotFound(format!("job not found: {job_id}")))?;
    Ok(Json(json!({
        "job_id": job.id,
        "task": job.task_name,
        "status": job.status,
        "attempts": job.attempts,
        "created_at": job.created_at,
        "started_at": job.started_at,
        "completed_at": job.completed_at,
        "result": job.result,
        "error": job.error,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    pub status: Option<String>,
    pub task: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_jobs(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Query(query): Query<JobListQuery>,
) -> ApiResult<Json<Value>> {
    // Admins see everything; users see their own.
    let user_filter = if is_admin(&user) { None } else { Some(user.id.as_str()) };
    let jobs = JobStore::new(&ctx.pool)
        .list(query.status.as_deref(), query.task.as_deref(), user_filter, query.limit)
        .await?;
    let listed: Vec<Value> = jobs
        .iter()
        .map(|j| {
            json!({
                "job_id": j.id,
                "task": j.task_name,
                "status": j.status,
                "created_at": j.created_at,
                "completed_at": j.completed_at,
                "error": j.error,
            })
        })
        .collect();
    Ok(Json(json!({ "jobs": listed, "total": listed.len() })))
}

/// Cancel a queued job.  Running jobs are past the point of no return.
pub async fn cancel_job(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let store = JobStore::new(&ctx.pool);
    let job = store
        .get(&job_id)
        .await?
        .filter(|j| is_admin(&user) || j.user_id.as_deref() == Some(user.id.as_str()))
        .ok_or_else(|| ApiError::NotFound(format!("job not found: {job_id}")))?;

    let cancelled = store.cancel(&job.id).await?;
    Ok(Json(json!({
        "job_id": job.id,
        "cancelled": cancelled,
        "reason": (!cancelled).then_some("job already started"),
    })))
}
