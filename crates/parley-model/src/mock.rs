// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use crate::{
    error::ProviderError,
    provider::{ChatProvider, ChunkStream},
    types::{ChatRequest, ProviderResponse, Role, TokenUsage},
};

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, req: ChatRequest) -> Result<ProviderResponse, ProviderError> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("[no input]");
        Ok(ProviderResponse {
            content: format!("MOCK: {reply}"),
            usage: TokenUsage { input: 10, output: 10, cost: None },
            model: "mock-model".into(),
            provider: "mock".into(),
            tool_calls: vec![],
            finish_reason: Some("stop".into()),
            raw: serde_json::Value::Null,
        })
    }

    async fn stream(&self, req: ChatRequest) -> Result<ChunkStream, ProviderError> {
        let r = self.complete(req).await?;
        Ok(Box::pin(stream::iter(vec![Ok(r.content)])))
    }
}

/// A pre-scripted mock.  Each `complete`/`stream` call pops the next
/// response from the front of the queue, so tests can script exact
/// multi-round sequences — including tool calls — without network access.
///
/// The last [`ChatRequest`] seen is recorded so tests can assert on what
/// was actually sent (e.g. that the cascade forwarded the ORIGINAL system
/// prompt to the premium model).
pub struct ScriptedMockProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
    provider_name: String,
    model: String,
    pub last_request: Mutex<Option<ChatRequest>>,
}

impl ScriptedMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            provider_name: "scripted-mock".into(),
            model: "scripted-mock-model".into(),
            last_request: Mutex::new(None),
        }
    }

    /// Override the reported provider/model names (useful when a test needs
    /// catalog pricing to apply).
    pub fn with_identity(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider_name = provider.into();
        self.model = model.into();
        self
    }

    /// Convenience: a provider that always answers with one text response.
    pub fn always_text(text: impl Into<String>) -> Self {
        let content = text.into();
        Self::new(vec![Self::text_response("scripted-mock-model", &content)])
    }

    /// Build a plain text response with small fixed usage numbers.
    pub fn text_response(model: &str, content: &str) -> ProviderResponse {
        ProviderResponse {
            content: content.to_string(),
            usage: TokenUsage { input: 5, output: 5, cost: None },
            model: model.to_string(),
            provider: "scripted-mock".into(),
            tool_calls: vec![],
            finish_reason: Some("stop".into()),
            raw: serde_json::Value::Null,
        }
    }

    fn pop(&self, req: ChatRequest) -> ProviderResponse {
        *self.last_request.lock().unwrap() = Some(req);
        self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
            // Default fallback when all scripts are consumed.
            Self::text_response(&self.model, "[no more scripts]")
        })
    }
}

#[async_trait]
impl ChatProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: ChatRequest) -> Result<ProviderResponse, ProviderError> {
        let mut r = self.pop(req);
        if r.model == "scripted-mock-model" {
            r.model = self.model.clone();
        }
        Ok(r)
    }

    async fn stream(&self, req: ChatRequest) -> Result<ChunkStream, ProviderError> {
        let r = self.pop(req);
        // Split into small chunks so consumers exercise real buffering.
        let chunks: Vec<Result<String, ProviderError>> = r
            .content
            .chars()
            .collect::<Vec<_>>()
            .chunks(6)
            .map(|c| Ok(c.iter().collect::<String>()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;
    use futures::StreamExt;

    fn req(text: &str) -> ChatRequest {
        ChatRequest { messages: vec![ChatMessage::user(text)], ..Default::default() }
    }

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let r = MockProvider.complete(req("hi")).await.unwrap();
        assert_eq!(r.content, "MOCK: hi");
        assert!(r.usage.input > 0);
    }

    #[tokio::test]
    async fn scripted_pops_in_order() {
        let p = ScriptedMockProvider::new(vec![
            ScriptedMockProvider::text_response("m", "first"),
            ScriptedMockProvider::text_response("m", "second"),
        ]);
        assert_eq!(p.complete(req("a")).await.unwrap().content, "first");
        assert_eq!(p.complete(req("b")).await.unwrap().content, "second");
    }

    #[tokio::test]
    async fn scripted_fallback_when_exhausted() {
        let p = ScriptedMockProvider::new(vec![]);
        let r = p.complete(req("x")).await.unwrap();
        assert!(r.content.contains("no more scripts"));
    }

    #[tokio::test]
    async fn scripted_records_last_request() {
        let p = ScriptedMockProvider::always_text("ok");
        let mut r = req("inspect me");
        r.system = Some("the system prompt".into());
        p.complete(r).await.unwrap();
        let seen = p.last_request.lock().unwrap();
        let seen = seen.as_ref().unwrap();
        assert_eq!(seen.system.as_deref(), Some("the system prompt"));
        assert_eq!(seen.messages[0].content, "inspect me");
    }

    #[tokio::test]
    async fn scripted_stream_chunks_reassemble() {
        let p = ScriptedMockProvider::always_text("hello streaming world");
        let mut s = p.stream(req("x")).await.unwrap();
        let mut full = String::new();
        while let Some(chunk) = s.next().await {
            full.push_str(&chunk.unwrap());
        }
        assert_eq!(full, "hello streaming world");
    }
}
