// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Cascading provider — fast model first, premium escalation on demand.
//!
//! The fast model's system prompt gains a self-assessment directive: when a
//! query warrants deeper reasoning it answers with an empathetic
//! acknowledgement ending in a literal trigger token instead of a
//! substantive reply.  Seeing the trigger, the wrapper re-runs the ORIGINAL
//! request against the premium model and returns that response with
//! combined usage and a pre-computed aggregate cost.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tracing::{debug, info};

use crate::{
    catalog,
    error::ProviderError,
    provider::{ChatProvider, ChunkStream},
    types::{ChatMessage, ChatRequest, ProviderResponse, TokenUsage},
};

/// Default escalation directive appended to the fast model's system prompt.
pub const ESCALATION_INSTRUCTIONS: &str = r#"

## COMPLEXITY SELF-ASSESSMENT

After formulating your response, assess if this query needs deeper analysis.

THINK MORE when:
- Financial decisions (refunds, compensation, pricing disputes)
- Legal or liability implications
- Safety concerns
- User frustration, complaints, or emotional distress
- Ambiguous situations with multiple valid interpretations
- You feel uncertain about your answer
- Policy edge cases

If deeper thinking is needed:
1. Respond with empathetic acknowledgment ONLY - do NOT give substantive answer
2. End with [THINKING_MORE]

CRITICAL: When escalating, NEVER provide the actual answer - only acknowledge and indicate you're thinking more.
"#;

/// Default trigger token the fast model emits to request escalation.
pub const DEFAULT_TRIGGER: &str = "[THINKING_MORE]";

/// Transition text streamed in place of the trigger.
pub const TRANSITION_TEXT: &str = "\n\nLet me think about this more carefully...\n\n";

pub struct CascadingProvider {
    fast: Arc<dyn ChatProvider>,
    premium: Arc<dyn ChatProvider>,
    trigger: String,
    transition: String,
    escalation_prompt: String,
}

impl CascadingProvider {
    pub fn new(fast: Arc<dyn ChatProvider>, premium: Arc<dyn ChatProvider>) -> Self {
        Self {
            fast,
            premium,
            trigger: DEFAULT_TRIGGER.into(),
            transition: TRANSITION_TEXT.into(),
            escalation_prompt: ESCALATION_INSTRUCTIONS.into(),
        }
    }

    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = trigger.into();
        self
    }

    pub fn with_transition(mut self, transition: impl Into<String>) -> Self {
        self.transition = transition.into();
        self
    }

    /// Escalation makes no sense when the fast model is already premium
    /// tier, or when both sides are the same model.
    fn should_inject(&self) -> bool {
        if catalog::is_premium_model(self.fast.model()) {
            return false;
        }
        self.fast.model() != self.premium.model()
    }

    fn inject_escalation(&self, system: Option<&str>) -> Option<String> {
        if !self.should_inject() {
            return system.map(|s| s.to_string());
        }
        Some(format!("{}{}", system.unwrap_or_default(), self.escalation_prompt))
    }

    fn combined_model(&self) -> String {
        format!("{}+{}", self.fast.model(), self.premium.model())
    }
}

#[async_trait]
impl ChatProvider for CascadingProvider {
    fn name(&self) -> &str {
        "cascading"
    }

    /// The fast model is the primary identity; audit records use the
    /// response's own `model` field, which becomes "fast+premium" when the
    /// cascade fires.
    fn model(&self) -> &str {
        self.fast.model()
    }

    fn count_tokens(&self, messages: &[ChatMessage]) -> usize {
        self.fast.count_tokens(messages)
    }

    fn max_context_tokens(&self) -> u32 {
        self.fast.max_context_tokens()
    }

    async fn complete(&self, req: ChatRequest) -> Result<ProviderResponse, ProviderError> {
        let mut fast_req = req.clone();
        fast_req.system = self.inject_escalation(req.system.as_deref());

        let fast_response = self.fast.complete(fast_req).await?;
        if !fast_response.content.contains(&self.trigger) {
            return Ok(fast_response);
        }

        info!(
            fast = %self.fast.model(),
            premium = %self.premium.model(),
            "escalation trigger detected; calling premium model"
        );

        // Premium sees the original messages and the ORIGINAL system prompt —
        // not the escalation directive and not the fast model's
        // acknowledgement — so it can answer the user directly.
        let premium_response = self.premium.complete(req).await?;

        let fast_cost = catalog::calculate_cost(
            self.fast.model(),
            fast_response.usage.input,
            fast_response.usage.output,
        );
        let premium_cost = catalog::calculate_cost(
            self.premium.model(),
            premium_response.usage.input,
            premium_response.usage.output,
        );

        Ok(ProviderResponse {
            content: premium_response.content,
            usage: TokenUsage {
                input: fast_response.usage.input + premium_response.usage.input,
                output: fast_response.usage.output + premium_response.usage.output,
                cost: Some(fast_cost + premium_cost),
            },
            model: self.combined_model(),
            provider: "cascading".into(),
            tool_calls: premium_response.tool_calls,
            finish_reason: premium_response.finish_reason,
            raw: json!({ "fast": fast_response.raw, "premium": premium_response.raw }),
        })
    }

    async fn stream(&self, req: ChatRequest) -> Result<ChunkStream, ProviderError> {
        let mut fast_req = req.clone();
        fast_req.system = self.inject_escalation(req.system.as_deref());

        let mut fast_stream = self.fast.stream(fast_req).await?;
        let premium = Arc::clone(&self.premium);
        let trigger = self.trigger.clone();
        let transition = self.transition.clone();
        // Extra slack so a trigger split across chunk boundaries is caught.
        let tail_chars = trigger.chars().count() + 10;

        let out = async_stream::stream! {
            let mut pending = String::new();
            while let Some(chunk) = fast_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                pending.push_str(&chunk);

                // Emit everything except a held-back tail window where the
                // trigger could still be forming.
                let total = pending.chars().count();
                if total > tail_chars {
                    let split = pending
                        .char_indices()
                        .nth(total - tail_chars)
                        .map(|(i, _)| i)
                        .unwrap_or(0);
                    let head = pending[..split].to_string();
                    pending = pending[split..].to_string();
                    if !head.is_empty() {
                        yield Ok(head);
                    }
                }
            }

            if pending.contains(&trigger) {
                debug!("escalation trigger in stream tail; switching to premium");
                yield Ok(transition.clone());
                let mut premium_stream = match premium.stream(req).await {
                    Ok(s) => s,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                while let Some(chunk) = premium_stream.next().await {
                    yield chunk;
                }
            } else if !pending.is_empty() {
                yield Ok(pending);
            }
        };

        Ok(Box::pin(out))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedMockProvider;
    use futures::StreamExt;

    fn req(text: &str, system: &str) -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::user(text)],
            system: Some(system.to_string()),
            ..Default::default()
        }
    }

    fn fast_with(responses: Vec<ProviderResponse>) -> Arc<ScriptedMockProvider> {
        Arc::new(ScriptedMockProvider::new(responses).with_identity("openai", "gpt-4o-mini"))
    }

    fn premium_with(responses: Vec<ProviderResponse>) -> Arc<ScriptedMockProvider> {
        Arc::new(
            ScriptedMockProvider::new(responses)
                .with_identity("anthropic", "claude-opus-4-20250514"),
        )
    }

    #[tokio::test]
    async fn no_trigger_returns_fast_response_verbatim() {
        let fast = fast_with(vec![ScriptedMockProvider::text_response("gpt-4o-mini", "hi there")]);
        let premium = premium_with(vec![]);
        let c = CascadingProvider::new(fast, Arc::clone(&premium) as Arc<dyn ChatProvider>);

        let r = c.complete(req("hello", "base")).await.unwrap();
        assert_eq!(r.content, "hi there");
        assert_eq!(r.model, "gpt-4o-mini");
        // Premium never called.
        assert!(premium.last_request.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn trigger_escalates_to_premium() {
        let fast = fast_with(vec![ScriptedMockProvider::text_response(
            "gpt-4o-mini",
            "I understand this is frustrating. Let me think… [THINKING_MORE]",
        )]);
        let premium = premium_with(vec![ScriptedMockProvider::text_response(
            "claude-opus-4-20250514",
            "Here is a careful answer about your refund.",
        )]);
        let c = CascadingProvider::new(fast, Arc::clone(&premium) as Arc<dyn ChatProvider>);

        let r = c.complete(req("refund dispute", "You are a support agent.")).await.unwrap();
        assert_eq!(r.content, "Here is a careful answer about your refund.");
        assert!(!r.content.contains("[THINKING_MORE]"));
        assert_eq!(r.model, "gpt-4o-mini+claude-opus-4-20250514");
        // Usage sums both sides (5+5 each from the scripted responses).
        assert_eq!(r.usage.input, 10);
        assert_eq!(r.usage.output, 10);
        assert!(r.usage.cost.is_some());
    }

    #[tokio::test]
    async fn fast_sees_escalation_directive_premium_sees_original() {
        let fast = fast_with(vec![ScriptedMockProvider::text_response(
            "gpt-4o-mini",
            "One moment… [THINKING_MORE]",
        )]);
        let premium = premium_with(vec![ScriptedMockProvider::text_response(
            "claude-opus-4-20250514",
            "answer",
        )]);
        let fast_ref = Arc::clone(&fast);
        let premium_ref = Arc::clone(&premium);
        let c = CascadingProvider::new(fast, premium);

        c.complete(req("help", "ORIGINAL PROMPT")).await.unwrap();

        let fast_system = fast_ref
            .last_request
            .lock()
            .unwrap()
            .as_ref()
            .unwrap()
            .system
            .clone()
            .unwrap();
        assert!(fast_system.starts_with("ORIGINAL PROMPT"));
        assert!(fast_system.contains("COMPLEXITY SELF-ASSESSMENT"));

        let premium_system = premium_ref
            .last_request
            .lock()
            .unwrap()
            .as_ref()
            .unwrap()
            .system
            .clone()
            .unwrap();
        assert_eq!(premium_system, "ORIGINAL PROMPT");
    }

    #[tokio::test]
    async fn no_injection_when_fast_equals_premium() {
        let fast = Arc::new(
            ScriptedMockProvider::new(vec![ScriptedMockProvider::text_response("m", "ok")])
                .with_identity("openai", "gpt-4o-mini"),
        );
        let premium = Arc::new(
            ScriptedMockProvider::new(vec![]).with_identity("openai", "gpt-4o-mini"),
        );
        let fast_ref = Arc::clone(&fast);
        let c = CascadingProvider::new(fast, premium);

        c.complete(req("hi", "BASE")).await.unwrap();
        let system =
            fast_ref.last_request.lock().unwrap().as_ref().unwrap().system.clone().unwrap();
        assert_eq!(system, "BASE");
    }

    #[tokio::test]
    async fn no_injection_when_fast_is_already_premium_tier() {
        let fast = Arc::new(
            ScriptedMockProvider::new(vec![ScriptedMockProvider::text_response("m", "ok")])
                .with_identity("anthropic", "claude-opus-4-20250514"),
        );
        let premium = premium_with(vec![]);
        let fast_ref = Arc::clone(&fast);
        let c = CascadingProvider::new(fast, premium);

        c.complete(req("hi", "BASE")).await.unwrap();
        let system =
            fast_ref.last_request.lock().unwrap().as_ref().unwrap().system.clone().unwrap();
        assert_eq!(system, "BASE");
    }

    #[tokio::test]
    async fn stream_without_trigger_passes_through() {
        let fast = fast_with(vec![ScriptedMockProvider::text_response(
            "gpt-4o-mini",
            "a perfectly ordinary streamed answer with no surprises at all",
        )]);
        let premium = premium_with(vec![]);
        let c = CascadingProvider::new(fast, premium);

        let mut s = c.stream(req("hi", "base")).await.unwrap();
        let mut full = String::new();
        while let Some(chunk) = s.next().await {
            full.push_str(&chunk.unwrap());
        }
        assert_eq!(full, "a perfectly ordinary streamed answer with no surprises at all");
    }

    #[tokio::test]
    async fn stream_with_trigger_switches_to_premium() {
        let fast = fast_with(vec![ScriptedMockProvider::text_response(
            "gpt-4o-mini",
            "I hear you, let me look into this… [THINKING_MORE]",
        )]);
        let premium = premium_with(vec![ScriptedMockProvider::text_response(
            "claude-opus-4-20250514",
            "the premium streamed answer",
        )]);
        let c = CascadingProvider::new(fast, premium);

        let mut s = c.stream(req("refund", "base")).await.unwrap();
        let mut full = String::new();
        while let Some(chunk) = s.next().await {
            full.push_str(&chunk.unwrap());
        }
        assert!(!full.contains("[THINKING_MORE]"));
        assert!(full.contains(TRANSITION_TEXT.trim()));
        assert!(full.ends_with("the premium streamed answer"));
    }
}
