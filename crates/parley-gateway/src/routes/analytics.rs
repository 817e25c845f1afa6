// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use parley_store::{AnalyticsStore, Period};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppContext,
};

pub async fn metrics(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Value>> {
    let m = AnalyticsStore::new(&ctx.pool).metrics(&user).await?;
    Ok(Json(json!(m)))
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    #[serde(default = "default_period")]
    pub period: String,
}

fn default_period() -> String {
    "week".to_string()
}

pub async fn usage(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Query(query): Query<UsageQuery>,
) -> ApiResult<Json<Value>> {
    let period = Period::parse(&query.period).ok_or_else(|| {
        ApiError::BadRequest(format!("unknown period '{}'; use day|week|month", query.period))
    })?;
    let buckets = AnalyticsStore::new(&ctx.pool).usage(&user, period).await?;
    Ok(Json(json!({ "period": query.period, "buckets": buckets })))
}

#[derive(Debug, Deserialize)]
pub struct CallsQuery {
    #[serde(default = "default_calls_limit")]
    pub limit: i64,
}

fn default_calls_limit() -> i64 {
    100
}

pub async fn llm_calls(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Query(query): Query<CallsQuery>,
) -> ApiResult<Json<Value>> {
    let calls = AnalyticsStore::new(&ctx.pool).llm_calls(&user, query.limit).await?;
    Ok(Json(json!({ "calls": calls })))
}
