// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Cross-driver behavior: the parts of the provider contract that must hold
//! regardless of which adapter is behind the trait object.

use std::sync::Arc;

use parley_model::{
    build_agent_provider, build_provider, ChatMessage, ChatProvider, ChatRequest,
    ScriptedMockProvider,
};
use parley_config::Settings;
use serde_json::json;

fn settings() -> Settings {
    Settings {
        openai_api_key: Some("sk-test".into()),
        anthropic_api_key: Some("sk-test".into()),
        groq_api_key: Some("gsk-test".into()),
        ..Settings::default()
    }
}

#[test]
fn every_driver_reports_a_context_window() {
    let s = settings();
    for (p, m) in [
        ("anthropic", "claude-sonnet-4-20250514"),
        ("openai", "gpt-4o-mini"),
        ("groq", "llama-3.3-70b-versatile"),
        ("ollama", "llama3.2"),
    ] {
        let provider = build_provider(p, m, &s).unwrap();
        assert!(provider.max_context_tokens() >= 32_768, "{p}/{m}");
    }
}

#[test]
fn unknown_model_context_window_falls_back() {
    let provider = build_provider("openai", "not-in-catalog", &settings()).unwrap();
    assert_eq!(provider.max_context_tokens(), 128_000);
}

#[test]
fn count_tokens_scales_with_content() {
    let provider = build_provider("mock", "mock-model", &settings()).unwrap();
    let short = vec![ChatMessage::user("hi")];
    let long = vec![ChatMessage::user("long message ".repeat(50))];
    assert!(provider.count_tokens(&long) > provider.count_tokens(&short));
}

#[tokio::test]
async fn trait_object_round_trip_with_tools() {
    // A scripted tool round through the trait object: tool call out,
    // result in, final text.
    let scripted = ScriptedMockProvider::new(vec![
        parley_model::ProviderResponse {
            content: String::new(),
            usage: Default::default(),
            model: "scripted-mock-model".into(),
            provider: "scripted-mock".into(),
            tool_calls: vec![parley_model::ToolCallRequest::new(
                "tc-1",
                "calculator",
                json!({"expr": "2+2"}),
            )],
            finish_reason: Some("tool_calls".into()),
            raw: serde_json::Value::Null,
        },
        ScriptedMockProvider::text_response("scripted-mock-model", "The answer is 4."),
    ]);
    let provider: Arc<dyn ChatProvider> = Arc::new(scripted);

    let first = provider
        .complete(ChatRequest {
            messages: vec![ChatMessage::user("what is 2+2?")],
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(first.has_tool_calls());

    let second = provider
        .complete(ChatRequest {
            messages: vec![
                ChatMessage::user("what is 2+2?"),
                ChatMessage::assistant_with_tools("", first.tool_calls.clone()),
                ChatMessage::tool_result("tc-1", "4"),
            ],
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(second.content.contains('4'));
    assert!(!second.has_tool_calls());
}

#[test]
fn cascade_identity_reports_fast_model() {
    let p = build_agent_provider(
        "groq",
        "llama-3.3-70b-versatile",
        Some("anthropic"),
        Some("claude-opus-4-20250514"),
        &settings(),
    )
    .unwrap();
    assert_eq!(p.name(), "cascading");
    assert_eq!(p.model(), "llama-3.3-70b-versatile");
    // Context window comes from the fast side.
    assert_eq!(p.max_context_tokens(), 128_000);
}
