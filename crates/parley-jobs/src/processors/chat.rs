// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Async chat: run the agent turn for a message the route already
//! persisted, publishing chunks to the thread's stream channel when the
//! caller asked for streaming.

use std::sync::{Arc, Mutex as StdMutex};

use serde_json::{json, Value};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::warn;

use parley_core::{CallType, ChatOptions, CostTracker};
use parley_store::CurrentUser;

use crate::{
    client::stream_channel,
    registry::{JobContext, JobError},
};

use super::WorkerServices;

fn require_str<'a>(payload: &'a Value, key: &str) -> Result<&'a str, JobError> {
    payload[key]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| JobError::terminal(format!("payload missing '{key}'")))
}

pub async fn process_chat(
    payload: Value,
    ctx: JobContext,
    _db: SqlitePool,
    services: Arc<WorkerServices>,
) -> Result<Value, JobError> {
    let thread_id = require_str(&payload, "thread_id")?.to_string();
    let message = require_str(&payload, "message")?.to_string();
    let message_id = require_str(&payload, "message_id")?.to_string();
    let user_id = ctx
        .user_id
        .clone()
        .or_else(|| payload["user_id"].as_str().map(|s| s.to_string()))
        .ok_or_else(|| JobError::terminal("payload missing user"))?;
    let role = payload["user_role"].as_str().unwrap_or("user");
    let stream = payload["stream"].as_bool().unwrap_or(false);

    let user = CurrentUser::new(user_id, role);
    let opts = &payload["options"];
    let options = ChatOptions {
        temperature: opts["temperature"].as_f64().map(|v| v as f32),
        memory_strategy: opts["memory_strategy"].as_str().map(|s| s.to_string()),
        memory_n: opts["memory_n"].as_u64(),
        stick_to_facts: opts["stick_to_facts"].as_bool().unwrap_or(false),
        objective_responses: opts["objective_responses"].as_bool().unwrap_or(false),
        call_type: if stream { CallType::ChatStream } else { CallType::Chat },
        // The route saved the user message before enqueueing.
        user_message_persisted: true,
    };

    let tracker = Arc::new(StdMutex::new(CostTracker::with_budgets(
        Some(services.settings.conversation_budget),
        Some(services.settings.total_budget),
    )));

    let outcome = if stream {
        let channel = stream_channel(&thread_id, &message_id);
        let (tx, mut rx) = mpsc::channel::<String>(64);

        // Relay chunks to the pub/sub channel as SSE-shaped payloads while
        // the turn runs.
        let client = services.client.clone();
        let relay_channel = channel.clone();
        let relay = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                let frame = json!({ "type": "content", "content": chunk }).to_string();
                if let Err(e) = client.publish(&relay_channel, &frame).await {
                    warn!(error = %e, "failed to publish stream chunk");
                    break;
                }
            }
        });

        let result = services
            .runtime
            .chat_stream(&thread_id, &user, &message, options, tracker, tx)
            .await;
        let _ = relay.await;

        match result {
            Ok(outcome) => {
                let done = json!({ "type": "done" }).to_string();
                let _ = services.client.publish(&channel, &done).await;
                outcome
            }
            Err(e) => {
                let frame = json!({ "type": "error", "error": e.to_string() }).to_string();
                let _ = services.client.publish(&channel, &frame).await;
                return Err(e.into());
            }
        }
    } else {
        services.runtime.chat(&thread_id, &user, &message, options, tracker).await?
    };

    // Summary maintenance rides on the same queue.
    if outcome.needs_summarization {
        let enqueue = services
            .client
            .enqueue("summarization", json!({ "thread_id": thread_id }), Some(&user.id), None)
            .await;
        if let Err(e) = enqueue {
            warn!(error = %e, "could not enqueue summarization");
        }
    }

    Ok(json!({
        "message_id": outcome.message.id,
        "content": outcome.message.content,
        "model": outcome.model,
        "cost": outcome.cost,
        "duration_ms": outcome.duration_ms,
        "tools_used": outcome.tools_used,
    }))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_are_terminal() {
        let payload = json!({ "thread_id": "t-1" });
        let err = require_str(&payload, "message").unwrap_err();
        assert!(!err.retryable);
        assert!(err.message.contains("message"));
    }

    #[test]
    fn present_fields_parse() {
        let payload = json!({ "thread_id": "t-1" });
        assert_eq!(require_str(&payload, "thread_id").unwrap(), "t-1");
    }
}
