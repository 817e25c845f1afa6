// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
pub mod agents;
pub mod analytics;
pub mod chat;
pub mod documents;
pub mod jobs;
pub mod threads;
pub mod workspaces;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppContext;

/// Every authenticated route, ready for the middleware stack.
pub fn api_router() -> Router<AppContext> {
    Router::new()
        // ── Agents ──────────────────────────────────────────────────────────
        .route("/agents", post(agents::create_agent).get(agents::list_agents))
        .route(
            "/agents/:id",
            get(agents::get_agent).patch(agents::update_agent).delete(agents::delete_agent),
        )
        .route("/agents/:id/clone", post(agents::clone_agent))
        .route("/agents/:id/full-prompt", get(agents::full_prompt))
        // ── Threads ─────────────────────────────────────────────────────────
        .route("/threads", post(threads::create_thread).get(threads::list_threads))
        .route(
            "/threads/:id",
            get(threads::get_thread)
                .patch(threads::update_thread)
                .delete(threads::delete_thread),
        )
        .route("/threads/:id/fork", post(threads::fork_thread))
        // ── Chat (the WS route mounts outside this router — see server.rs) ──
        .route("/chat/:thread_id", post(chat::chat))
        .route("/chat/:thread_id/stream", post(chat::chat_stream))
        .route("/chat/:thread_id/messages", get(chat::list_messages))
        .route("/chat/:thread_id/subscribe/:channel_id", get(chat::subscribe))
        // ── Documents ───────────────────────────────────────────────────────
        .route(
            "/documents",
            post(documents::upload_document).get(documents::list_documents),
        )
        .route(
            "/documents/:id",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route("/documents/search", post(documents::search_documents))
        // ── Workspaces ──────────────────────────────────────────────────────
        .route(
            "/workspaces",
            post(workspaces::create_workspace).get(workspaces::list_workspaces),
        )
        .route("/workspaces/:id", get(workspaces::get_workspace))
        .route("/workspaces/:id/members", post(workspaces::add_member))
        .route("/workspaces/:id/members/:user_id", axum::routing::delete(workspaces::remove_member))
        // ── Analytics ───────────────────────────────────────────────────────
        .route("/analytics/metrics", get(analytics::metrics))
        .route("/analytics/usage", get(analytics::usage))
        .route("/analytics/llm-calls", get(analytics::llm_calls))
        // ── Jobs ────────────────────────────────────────────────────────────
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/jobs/:id/cancel", post(jobs::cancel_job))
}
