// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! End-to-end scenarios through the wired application state: agent →
//! thread → chat turn → audit trail, with the mock provider standing in
//! for the LLM.

use std::sync::{Arc, Mutex as StdMutex};

use parley_config::Settings;
use parley_core::{ChatOptions, CostTracker};
use parley_gateway::AppContext;
use parley_store::{
    AgentCreate, AgentStore, AnalyticsStore, CurrentUser, MessageStore, ThreadStore,
};

fn mock_settings() -> Settings {
    Settings {
        default_provider: "mock".into(),
        default_model: "mock-model".into(),
        conversation_budget: 1.0,
        total_budget: 100.0,
        ..Settings::default()
    }
}

async fn seed_agent_and_thread(ctx: &AppContext, user: &CurrentUser) -> (String, String) {
    let agent = AgentStore::new(&ctx.pool)
        .create(
            AgentCreate {
                name: "assistant".into(),
                system_prompt: "You are a helpful assistant.".into(),
                provider: Some("mock".into()),
                model: Some("mock-model".into()),
                ..Default::default()
            },
            user,
        )
        .await
        .unwrap();
    let thread = ThreadStore::new(&ctx.pool).create(&agent.id, user, None, None).await.unwrap();
    (agent.id, thread.id)
}

#[tokio::test]
async fn happy_path_chat_end_to_end() {
    let ctx = AppContext::build(mock_settings()).await.unwrap();
    let user = CurrentUser::member("alice");
    let (_, thread_id) = seed_agent_and_thread(&ctx, &user).await;

    let tracker = ctx.tracker_for(&thread_id);
    let outcome = ctx
        .runtime
        .chat(&thread_id, &user, "Hello", ChatOptions::default(), tracker)
        .await
        .unwrap();

    assert_eq!(outcome.message.role, "assistant");
    assert!(!outcome.message.content.is_empty());

    // Two new messages, user first, timestamps monotone, turn counted.
    let log = MessageStore::new(&ctx.pool).list(&thread_id, 100).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].role, "user");
    assert_eq!(log[1].role, "assistant");
    assert!(log[0].created_at <= log[1].created_at);

    let thread = ThreadStore::new(&ctx.pool).get(&thread_id, &user).await.unwrap().unwrap();
    assert_eq!(thread.turn_count, 1);
}

#[tokio::test]
async fn budget_exhausted_chat_is_rejected_before_provider() {
    let ctx = AppContext::build(mock_settings()).await.unwrap();
    let user = CurrentUser::member("alice");
    let (_, thread_id) = seed_agent_and_thread(&ctx, &user).await;

    // Conversation budget: $1.00, already spent $0.99 + one more cent.
    let tracker = ctx.tracker_for(&thread_id);
    tracker.lock().unwrap().add_usage("x", 0, 0, Some(1.0));

    let err = ctx
        .runtime
        .chat(&thread_id, &user, "anything", ChatOptions::default(), Arc::clone(&tracker))
        .await
        .unwrap_err();
    assert!(matches!(err, parley_core::ChatError::Budget(_)));
    assert!(MessageStore::new(&ctx.pool).list(&thread_id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn out_of_scope_user_sees_nothing() {
    let ctx = AppContext::build(mock_settings()).await.unwrap();
    let alice = CurrentUser::member("alice");
    let (agent_id, thread_id) = seed_agent_and_thread(&ctx, &alice).await;

    let eve = CurrentUser::member("eve");
    assert!(ThreadStore::new(&ctx.pool).get(&thread_id, &eve).await.unwrap().is_none());
    assert!(AgentStore::new(&ctx.pool).get(&agent_id, &eve).await.unwrap().is_none());

    let err = ctx
        .runtime
        .chat(&thread_id, &eve, "let me in", ChatOptions::default(), ctx.tracker_for(&thread_id))
        .await
        .unwrap_err();
    assert!(matches!(err, parley_core::ChatError::NotFound(_)));
}

#[tokio::test]
async fn audit_log_records_completions() {
    let ctx = AppContext::build(mock_settings()).await.unwrap();
    let user = CurrentUser::member("alice");
    let (_, thread_id) = seed_agent_and_thread(&ctx, &user).await;

    ctx.runtime
        .chat(&thread_id, &user, "first", ChatOptions::default(), ctx.tracker_for(&thread_id))
        .await
        .unwrap();
    ctx.runtime
        .chat(&thread_id, &user, "second", ChatOptions::default(), ctx.tracker_for(&thread_id))
        .await
        .unwrap();

    let calls = AnalyticsStore::new(&ctx.pool).llm_calls(&user, 10).await.unwrap();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.model.is_some()));

    let metrics = AnalyticsStore::new(&ctx.pool).metrics(&user).await.unwrap();
    assert_eq!(metrics.thread_count, 1);
    assert_eq!(metrics.message_count, 4);
}

#[tokio::test]
async fn conversation_budget_tracker_survives_across_turns() {
    let ctx = AppContext::build(mock_settings()).await.unwrap();
    let user = CurrentUser::member("alice");
    let (_, thread_id) = seed_agent_and_thread(&ctx, &user).await;

    let tracker: Arc<StdMutex<CostTracker>> = ctx.tracker_for(&thread_id);
    ctx.runtime
        .chat(&thread_id, &user, "one", ChatOptions::default(), Arc::clone(&tracker))
        .await
        .unwrap();
    let requests_after_first = tracker.lock().unwrap().request_count;
    ctx.runtime
        .chat(&thread_id, &user, "two", ChatOptions::default(), ctx.tracker_for(&thread_id))
        .await
        .unwrap();
    assert!(tracker.lock().unwrap().request_count > requests_after_first);
}
