// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A single tool invocation requested by the model.
///
/// `arguments` is always a parsed JSON object — adapters are responsible for
/// normalizing whatever the wire gave them (string, double-encoded string,
/// null) before constructing one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self { id: id.into(), name: name.into(), arguments }
    }
}

/// A single message in the canonical conversation format.
///
/// `tool_calls` is non-empty only for assistant messages that requested
/// tools; `tool_call_id` is set only for `role = tool` result messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: text.into(), tool_calls: vec![], tool_call_id: None }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: text.into(), tool_calls: vec![], tool_call_id: None }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: text.into(), tool_calls: vec![], tool_call_id: None }
    }

    pub fn assistant_with_tools(text: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self { role: Role::Assistant, content: text.into(), tool_calls: calls, tool_call_id: None }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: vec![],
            tool_call_id: Some(call_id.into()),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: Value,
}

/// Request sent to a model provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// System prompt; providers place it in their native slot (top-level
    /// field for Anthropic, leading message for OpenAI-compatible APIs).
    pub system: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub tools: Vec<ToolSpec>,
}

impl Default for ChatRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            system: None,
            temperature: 0.7,
            max_tokens: 4096,
            tools: Vec::new(),
        }
    }
}

// ─── Responses ────────────────────────────────────────────────────────────────

/// Token usage from one completion.
///
/// `cost` is set only when the provider pre-computed an exact figure (the
/// cascading wrapper does this because its token counts span two models with
/// different prices).  Callers fall back to the catalog price otherwise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Normalized result of one provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
    pub provider: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub raw: Value,
}

impl ProviderResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

// ─── Token estimation ─────────────────────────────────────────────────────────

/// Heuristic token estimation: CJK code points weigh 0.7 tokens each, the
/// remaining characters 1/3.5, minimum 1.
///
/// Providers that expose an exact counter can override
/// [`crate::ChatProvider::count_tokens`]; everything else uses this.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let mut cjk = 0usize;
    let mut total = 0usize;
    for c in text.chars() {
        total += 1;
        let cp = c as u32;
        if (0x4E00..=0x9FFF).contains(&cp)      // CJK Unified Ideographs
            || (0x3400..=0x4DBF).contains(&cp)  // CJK Extension A
            || (0x3040..=0x30FF).contains(&cp)  // Hiragana + Katakana
            || (0xAC00..=0xD7AF).contains(&cp)  // Hangul
        {
            cjk += 1;
        }
    }
    let latin = total - cjk;
    let tokens = cjk as f64 * 0.7 + latin as f64 / 3.5;
    (tokens as usize).max(1)
}

/// Estimate tokens across a message slice, including tool-call payloads.
pub fn estimate_message_tokens(messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .map(|m| {
            let mut n = estimate_tokens(&m.content);
            for tc in &m.tool_calls {
                n += estimate_tokens(&tc.name) + estimate_tokens(&tc.arguments.to_string());
            }
            n
        })
        .sum()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_user_sets_role_and_text() {
        let m = ChatMessage::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content, "hello");
        assert!(!m.has_tool_calls());
    }

    #[test]
    fn message_tool_result_carries_call_id() {
        let m = ChatMessage::tool_result("call-1", "4");
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(m.content, "4");
    }

    #[test]
    fn assistant_with_tools_has_tool_calls() {
        let m = ChatMessage::assistant_with_tools(
            "",
            vec![ToolCallRequest::new("tc-1", "calculator", json!({"expr": "2+2"}))],
        );
        assert!(m.has_tool_calls());
        assert_eq!(m.tool_calls[0].name, "calculator");
    }

    #[test]
    fn role_round_trips_through_str() {
        for r in [Role::System, Role::User, Role::Assistant, Role::Tool] {
            assert_eq!(r.as_str().parse::<Role>().unwrap(), r);
        }
    }

    #[test]
    fn message_serializes_without_empty_fields() {
        let json = serde_json::to_string(&ChatMessage::user("hi")).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_call_id"));
    }

    // ── Token estimation ──────────────────────────────────────────────────────

    #[test]
    fn estimate_empty_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn estimate_minimum_is_one() {
        assert_eq!(estimate_tokens("a"), 1);
    }

    #[test]
    fn estimate_latin_divides_by_three_and_a_half() {
        // 35 latin chars / 3.5 = 10 tokens
        let text = "a".repeat(35);
        assert_eq!(estimate_tokens(&text), 10);
    }

    #[test]
    fn estimate_cjk_weighs_more_than_latin() {
        let latin = "hello world this is a test string here";
        let cjk = "你好世界这是一个测试字符串在这里啊啊";
        // Equal-length strings: CJK at 0.7/char outweighs latin at 1/3.5.
        assert!(estimate_tokens(cjk) > estimate_tokens(&latin[..cjk.chars().count()]));
    }

    #[test]
    fn estimate_messages_includes_tool_calls() {
        let plain = vec![ChatMessage::user("hello there")];
        let with_tool = vec![ChatMessage::assistant_with_tools(
            "hello there",
            vec![ToolCallRequest::new("1", "search_documents", json!({"query": "budget report"}))],
        )];
        assert!(estimate_message_tokens(&with_tool) > estimate_message_tokens(&plain));
    }
}
