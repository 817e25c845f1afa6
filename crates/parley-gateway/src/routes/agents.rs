// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use parley_core::render_system_prompt;
use parley_store::{Agent, AgentCreate, AgentStore, AgentUpdate};

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

pub async fn create_agent(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Json(input): Json<AgentCreate>,
) -> ApiResult<(StatusCode, Json<Agent>)> {
    if input.name.trim().is_empty() {
        return Err(ApiError::BadRequest("agent name is required".into()));
    }
    // An unknown provider id is a configuration error worth failing loudly
    // at create time rather than on the first chat.
    if let Some(provider) = &input.provider {
        parley_model::build_provider(
            provider,
            input.model.as_deref().unwrap_or(&ctx.settings.default_model),
            &ctx.settings,
        )
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    }
    let agent = AgentStore::new(&ctx.pool).create(input, &user).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

pub async fn list_agents(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Agent>>> {
    Ok(Json(AgentStore::new(&ctx.pool).list(&user, query.limit).await?))
}

pub async fn get_agent(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<Agent>> {
    AgentStore::new(&ctx.pool)
        .get(&agent_id, &user)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("agent not found: {agent_id}")))
}

pub async fn update_agent(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path(agent_id): Path<String>,
    Json(input): Json<AgentUpdate>,
) -> ApiResult<Json<Agent>> {
    AgentStore::new(&ctx.pool)
        .update(&agent_id, input, &user)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("agent not found: {agent_id}")))
}

pub async fn delete_agent(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path(agent_id): Path<String>,
) -> ApiResult<StatusCode> {
    if AgentStore::new(&ctx.pool).delete(&agent_id, &user).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("agent not found: {agent_id}")))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CloneBody {
    pub name: Option<String>,
}

pub async fn clone_agent(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path(agent_id): Path<String>,
    body: Option<Json<CloneBody>>,
) -> ApiResult<(StatusCode, Json<Agent>)> {
    let name = body.and_then(|Json(b)| b.name);
    AgentStore::new(&ctx.pool)
        .clone_agent(&agent_id, name, &user)
        .await?
        .map(|a| (StatusCode::CREATED, Json(a)))
        .ok_or_else(|| ApiError::NotFound(format!("agent not found: {agent_id}")))
}

/// Render the compiled system prompt as the runtime would send it for this
/// caller, including their stored context.
pub async fn full_prompt(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let agent = AgentStore::new(&ctx.pool)
        .get(&agent_id, &user)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("agent not found: {agent_id}")))?;
    let user_context = ctx
        .runtime
        .context_provider()
        .load(&user.id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let prompt = render_system_prompt(
        &agent.system_prompt,
        user_context.as_ref(),
        agent.context_schema.as_ref(),
        &[],
        false,
        false,
    );
    Ok(Json(json!({ "agent_id": agent.id, "prompt": prompt })))
}
