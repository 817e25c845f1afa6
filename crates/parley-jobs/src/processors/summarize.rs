// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Rolling-summary maintenance: condense messages past the watermark into
//! the thread's summary, leaving the recent tail in full detail.
//!
//! Idempotent by watermark: the job reads the CURRENT watermark, works from
//! there, and re-checks it before writing, so a duplicate delivery (or a
//! concurrent run) cannot regress the summary.

use std::sync::Arc;

use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::info;

use parley_core::ModelSpec;
use parley_memory::{HistoryMessage, SummarizationHelper};
use parley_model::{catalog, ChatMessage, ChatRequest};
use parley_store::{AgentStore, MessageStore, ThreadStore};

use crate::registry::{JobContext, JobError};

use super::WorkerServices;

/// Messages kept verbatim at the tail of the thread.
const KEEP_RECENT: usize = 10;

pub async fn process_summarization(
    payload: Value,
    _ctx: JobContext,
    db: SqlitePool,
    services: Arc<WorkerServices>,
) -> Result<Value, JobError> {
    let thread_id = payload["thread_id"]
        .as_str()
        .ok_or_else(|| JobError::terminal("payload missing 'thread_id'"))?;

    let threads = ThreadStore::new(&db);
    let Some(thread) = threads.get_unscoped(thread_id).await? else {
        return Err(JobError::terminal(format!("thread not found: {thread_id}")));
    };
    let Some(agent) = AgentStore::new(&db).get_unscoped(&thread.agent_id).await? else {
        return Err(JobError::terminal(format!("agent not found: {}", thread.agent_id)));
    };

    let watermark = thread.summarized_until_msg_id.clone();
    let to_summarize = MessageStore::new(&db)
        .unsummarized(thread_id, watermark.as_deref(), KEEP_RECENT)
        .await?;
    if to_summarize.is_empty() {
        return Ok(json!({ "skipped": "no messages to summarize" }));
    }

    let history: Vec<HistoryMessage> = to_summarize
        .iter()
        .map(|m| HistoryMessage::new(m.id.clone(), m.role.clone(), m.content.clone()))
        .collect();
    let last_id = history.last().map(|m| m.id.clone()).expect("non-empty batch");

    let max_context = catalog::max_context(&agent.model, 128_000) as usize;
    let word_limit =
        SummarizationHelper::summary_word_limit(max_context, agent.system_prompt.len());
    let prompt = SummarizationHelper::build_summarization_prompt(
        thread.summary.as_deref().unwrap_or(""),
        &history,
        word_limit,
    );

    // Summaries run on the agent's base model — never the cascade.
    let provider = services
        .providers
        .provider_for(&ModelSpec {
            provider: agent.provider.clone(),
            model: agent.model.clone(),
            premium_provider: None,
            premium_model: None,
        })
        .map_err(|e| JobError::terminal(e.to_string()))?;
    let response = provider
        .complete(ChatRequest {
            messages: vec![ChatMessage::user(prompt)],
            system: None,
            temperature: 0.3,
            max_tokens: 1000,
            tools: vec![],
        })
        .await?;
    let summary = response.content.trim().to_string();
    if summary.is_empty() {
        return Err(JobError::transient("model returned an empty summary"));
    }

    // Another run may have advanced the watermark while the model was
    // thinking; writing over its work would drop context.
    let current = threads.get_unscoped(thread_id).await?;
    if current.as_ref().and_then(|t| t.summarized_until_msg_id.clone()) != watermark {
        info!(thread_id, "watermark moved during summarization; skipping write");
        return Ok(json!({ "skipped": "watermark advanced concurrently" }));
    }

    threads.set_summary(thread_id, &summary, &last_id).await?;
    info!(
        thread_id,
        summarized = history.len(),
        summary_chars = summary.len(),
        "rolling summary updated"
    );
    Ok(json!({
        "messages_summarized": history.len(),
        "summary_length": summary.len(),
        "summarized_until": last_id,
    }))
}
