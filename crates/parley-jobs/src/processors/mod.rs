// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! The core task processors: async chat, rolling-summary maintenance, and
//! document ingestion.

mod chat;
mod documents;
mod summarize;

pub use chat::process_chat;
pub use documents::{chunk_text, process_document_ingest};
pub use summarize::process_summarization;

use std::sync::Arc;

use parley_config::Settings;
use parley_core::{AgentRuntime, ProviderFactory};
use parley_model::embeddings::Embedder;

use crate::{client::JobClient, registry::JobRegistry};

/// Everything the processors need beyond (payload, ctx, db).
pub struct WorkerServices {
    pub settings: Arc<Settings>,
    pub runtime: Arc<AgentRuntime>,
    pub providers: Arc<dyn ProviderFactory>,
    pub embedder: Option<Arc<dyn Embedder>>,
    /// Used both to publish stream frames and to enqueue follow-up jobs.
    pub client: JobClient,
}

/// Register the core tasks.
pub fn register_core_tasks(registry: &mut JobRegistry, services: Arc<WorkerServices>) {
    let s = Arc::clone(&services);
    registry.register("chat_response", move |payload, ctx, db| {
        let s = Arc::clone(&s);
        async move { process_chat(payload, ctx, db, s).await }
    });

    let s = Arc::clone(&services);
    registry.register("summarization", move |payload, ctx, db| {
        let s = Arc::clone(&s);
        async move { process_summarization(payload, ctx, db, s).await }
    });

    let s = Arc::clone(&services);
    registry.register("document_ingest", move |payload, ctx, db| {
        let s = Arc::clone(&s);
        async move { process_document_ingest(payload, ctx, db, s).await }
    });
}
