// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use parley_store::{Workspace, WorkspaceStore};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppContext,
};

#[derive(Debug, Deserialize)]
pub struct WorkspaceCreate {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MemberBody {
    pub user_id: String,
    #[serde(default = "default_member_role")]
    pub role: String,
}

fn default_member_role() -> String {
    "member".to_string()
}

pub async fn create_workspace(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Json(input): Json<WorkspaceCreate>,
) -> ApiResult<(StatusCode, Json<Workspace>)> {
    if input.name.trim().is_empty() {
        return Err(ApiError::BadRequest("workspace name is required".into()));
    }
    let ws = WorkspaceStore::new(&ctx.pool)
        .create(&input.name, input.description.as_deref(), &user)
        .await?;
    Ok((StatusCode::CREATED, Json(ws)))
}

pub async fn list_workspaces(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Vec<Workspace>>> {
    Ok(Json(WorkspaceStore::new(&ctx.pool).list(&user).await?))
}

pub async fn get_workspace(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path(workspace_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let store = WorkspaceStore::new(&ctx.pool);
    let ws = store
        .get(&workspace_id, &user)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("workspace not found: {workspace_id}")))?;
    let members = store.members(&workspace_id).await?;
    Ok(Json(json!({ "workspace": ws, "members": members })))
}

pub async fn add_member(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path(workspace_id): Path<String>,
    Json(body): Json<MemberBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let member = WorkspaceStore::new(&ctx.pool)
        .add_member(&workspace_id, &body.user_id, &body.role, &user)
        .await?;
    Ok((StatusCode::CREATED, Json(json!(member))))
}

pub async fn remove_member(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path((workspace_id, member_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    if WorkspaceStore::new(&ctx.pool).remove_member(&workspace_id, &member_id, &user).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("member not found".into()))
    }
}
