// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Service bootstrap: wire the state, assemble the middleware stack, serve
//! until shutdown.

use std::time::Duration;

use axum::{middleware, routing::get, Extension, Json, Router};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::info;

use parley_config::Settings;
use parley_core::DEFAULT_LOCK_TTL;

use crate::{
    auth::{auth_and_rate_limit, RateLimitState},
    routes::api_router,
    state::AppContext,
};

/// Liveness probe; the only unauthenticated route.
async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    if settings.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> = settings
            .cors_origins
            .iter()
            .filter_map(|o| o.parse::<axum::http::HeaderValue>().ok())
            .collect();
        CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
    }
}

/// Build the full application router over an existing context.
pub fn app(ctx: AppContext) -> Router {
    let limits = RateLimitState::from_settings(&ctx.settings);
    let body_limit = ctx.settings.max_upload_size as usize;
    let cors = cors_layer(&ctx.settings);

    let api = api_router()
        .layer(middleware::from_fn_with_state(ctx.clone(), auth_and_rate_limit))
        .layer(Extension(limits));

    Router::new()
        .route("/healthz", get(healthz))
        // The WebSocket route authenticates in-handler (query-param token or
        // an auth handshake frame): browsers cannot attach the bearer header
        // to an upgrade request, so it stays outside the auth middleware.
        .route("/chat/:thread_id/ws", get(crate::routes::chat::chat_ws))
        .merge(api)
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Wire everything and serve until ctrl-c.
pub async fn serve(settings: Settings) -> anyhow::Result<()> {
    let addr = format!("{}:{}", settings.host, settings.port);
    let ctx = AppContext::build(settings).await?;

    // Periodic lock-table hygiene for long-running processes.
    let locks = std::sync::Arc::clone(&ctx.locks);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        loop {
            interval.tick().await;
            locks.cleanup(DEFAULT_LOCK_TTL);
        }
    });

    let router = app(ctx);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "parley gateway listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
