// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    error::ProviderError,
    parse::parse_tool_args,
    provider::{ChatProvider, ChunkStream},
    sanitize::drop_orphan_tool_calls,
    types::{ChatMessage, ChatRequest, ProviderResponse, Role, TokenUsage, ToolCallRequest},
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct AnthropicProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(model: String, api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client"),
        }
    }

    fn key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Auth("ANTHROPIC_API_KEY not set".into()))
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let (system, messages) = build_anthropic_messages(&req.messages, req.system.as_deref());

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
            "stream": stream,
        });
        if let Some(sys) = system {
            body["system"] = json!(sys);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.key()?)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: ChatRequest) -> Result<ProviderResponse, ProviderError> {
        debug!(model = %self.model, messages = req.messages.len(), "anthropic complete");
        let body = self.build_body(&req, false);
        let resp = self.send(&body).await?;
        let v: Value = resp.json().await.map_err(ProviderError::from_transport)?;
        Ok(parse_anthropic_response(&v, &self.model))
    }

    async fn stream(&self, req: ChatRequest) -> Result<ChunkStream, ProviderError> {
        debug!(model = %self.model, messages = req.messages.len(), "anthropic stream");
        let body = self.build_body(&req, true);
        let resp = self.send(&body).await?;

        // SSE lines can split across TCP chunks; a remainder buffer carries
        // the incomplete tail forward.
        let chunks = resp
            .bytes_stream()
            .scan(String::new(), |buf, chunk| {
                let mut out: Vec<Result<String, ProviderError>> = Vec::new();
                match chunk {
                    Ok(bytes) => {
                        buf.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = buf.find('\n') {
                            let line = buf[..pos].trim_end_matches('\r').to_string();
                            buf.drain(..=pos);
                            if let Some(data) = line.strip_prefix("data: ") {
                                if let Ok(event) = serde_json::from_str::<Value>(data.trim()) {
                                    if let Some(text) = extract_stream_text(&event) {
                                        if !text.is_empty() {
                                            out.push(Ok(text));
                                        }
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => out.push(Err(ProviderError::from_transport(e))),
                }
                futures::future::ready(Some(out))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(chunks))
    }
}

/// Text content of a streaming event, if it carries any.
fn extract_stream_text(event: &Value) -> Option<String> {
    if event["type"].as_str()? != "content_block_delta" {
        return None;
    }
    let delta = &event["delta"];
    if delta["type"].as_str()? != "text_delta" {
        return None;
    }
    Some(delta["text"].as_str().unwrap_or_default().to_string())
}

/// Parse a non-streaming messages-API response into canonical form.
pub(crate) fn parse_anthropic_response(v: &Value, model: &str) -> ProviderResponse {
    let mut content = String::new();
    let mut tool_calls: Vec<ToolCallRequest> = Vec::new();

    if let Some(blocks) = v["content"].as_array() {
        for block in blocks {
            match block["type"].as_str().unwrap_or("") {
                "text" => content.push_str(block["text"].as_str().unwrap_or_default()),
                "tool_use" => {
                    tool_calls.push(ToolCallRequest::new(
                        block["id"].as_str().unwrap_or_default(),
                        block["name"].as_str().unwrap_or_default(),
                        parse_tool_args(block.get("input")),
                    ));
                }
                _ => {}
            }
        }
    }

    ProviderResponse {
        content,
        usage: TokenUsage {
            input: v["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output: v["usage"]["output_tokens"].as_u64().unwrap_or(0),
            cost: None,
        },
        model: v["model"].as_str().unwrap_or(model).to_string(),
        provider: "anthropic".into(),
        tool_calls,
        finish_reason: v["stop_reason"].as_str().map(|s| s.to_string()),
        raw: v.clone(),
    }
}

/// Convert canonical messages into the Anthropic wire format.
///
/// Returns `(system_text, conversation_messages)`.  The system prompt goes
/// in the top-level `system` field; a system-role message in the history
/// overrides the request-level prompt.  Orphaned tool-call halves are
/// dropped before conversion.
pub(crate) fn build_anthropic_messages(
    messages: &[ChatMessage],
    system: Option<&str>,
) -> (Option<String>, Vec<Value>) {
    let messages = drop_orphan_tool_calls(messages.to_vec());
    let mut system_text = system.map(|s| s.to_string());
    let mut out: Vec<Value> = Vec::new();

    for m in &messages {
        match m.role {
            Role::System => {
                system_text = Some(m.content.clone());
            }
            Role::Tool => {
                out.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                        "content": m.content,
                    }]
                }));
            }
            Role::Assistant if m.has_tool_calls() => {
                let mut blocks: Vec<Value> = Vec::new();
                if !m.content.is_empty() {
                    blocks.push(json!({ "type": "text", "text": m.content }));
                }
                for tc in &m.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": tc.arguments,
                    }));
                }
                out.push(json!({ "role": "assistant", "content": blocks }));
            }
            Role::Assistant => {
                out.push(json!({ "role": "assistant", "content": m.content }));
            }
            Role::User => {
                out.push(json!({ "role": "user", "content": m.content }));
            }
        }
    }
    (system_text.filter(|s| !s.is_empty()), out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provider_name_and_model() {
        let p = AnthropicProvider::new("claude-sonnet-4-20250514".into(), None, None);
        assert_eq!(p.name(), "anthropic");
        assert_eq!(p.model(), "claude-sonnet-4-20250514");
    }

    #[test]
    fn system_goes_to_top_level_field() {
        let (sys, msgs) =
            build_anthropic_messages(&[ChatMessage::user("hi")], Some("be helpful"));
        assert_eq!(sys.as_deref(), Some("be helpful"));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["role"], "user");
    }

    #[test]
    fn system_message_in_history_overrides_request_system() {
        let (sys, msgs) = build_anthropic_messages(
            &[ChatMessage::system("from history"), ChatMessage::user("hi")],
            Some("from request"),
        );
        assert_eq!(sys.as_deref(), Some("from history"));
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn tool_call_becomes_tool_use_block() {
        let msgs = vec![
            ChatMessage::assistant_with_tools(
                "",
                vec![ToolCallRequest::new("tc-1", "calculator", json!({"expr": "2+2"}))],
            ),
            ChatMessage::tool_result("tc-1", "4"),
        ];
        let (_, wire) = build_anthropic_messages(&msgs, None);
        assert_eq!(wire[0]["role"], "assistant");
        assert_eq!(wire[0]["content"][0]["type"], "tool_use");
        assert_eq!(wire[0]["content"][0]["id"], "tc-1");
        assert_eq!(wire[0]["content"][0]["input"]["expr"], "2+2");
    }

    #[test]
    fn tool_result_becomes_user_tool_result_block() {
        let msgs = vec![
            ChatMessage::assistant_with_tools(
                "",
                vec![ToolCallRequest::new("tc-9", "search", json!({}))],
            ),
            ChatMessage::tool_result("tc-9", "three results"),
        ];
        let (_, wire) = build_anthropic_messages(&msgs, None);
        let block = &wire[1]["content"][0];
        assert_eq!(wire[1]["role"], "user");
        assert_eq!(block["type"], "tool_result");
        assert_eq!(block["tool_use_id"], "tc-9");
        assert_eq!(block["content"], "three results");
    }

    #[test]
    fn orphan_tool_use_is_dropped_from_wire() {
        // History truncation removed the tool result: the request must not
        // contain the dangling tool_use block.
        let msgs = vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant_with_tools(
                "",
                vec![ToolCallRequest::new("tc-lost", "search", json!({}))],
            ),
            ChatMessage::assistant("done"),
        ];
        let (_, wire) = build_anthropic_messages(&msgs, None);
        assert_eq!(wire.len(), 2);
        let serialized = serde_json::to_string(&wire).unwrap();
        assert!(!serialized.contains("tool_use"));
    }

    #[test]
    fn assistant_text_with_tool_call_keeps_text_block() {
        let msgs = vec![
            ChatMessage::assistant_with_tools(
                "let me check",
                vec![ToolCallRequest::new("tc-2", "search", json!({}))],
            ),
            ChatMessage::tool_result("tc-2", "found"),
        ];
        let (_, wire) = build_anthropic_messages(&msgs, None);
        assert_eq!(wire[0]["content"][0]["type"], "text");
        assert_eq!(wire[0]["content"][1]["type"], "tool_use");
    }

    // ── Response parsing ──────────────────────────────────────────────────────

    #[test]
    fn parse_text_response() {
        let v = json!({
            "content": [{"type": "text", "text": "Hello!"}],
            "model": "claude-sonnet-4-20250514",
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 4}
        });
        let r = parse_anthropic_response(&v, "claude-sonnet-4-20250514");
        assert_eq!(r.content, "Hello!");
        assert_eq!(r.usage.input, 12);
        assert_eq!(r.usage.output, 4);
        assert_eq!(r.finish_reason.as_deref(), Some("end_turn"));
        assert!(r.tool_calls.is_empty());
    }

    #[test]
    fn parse_tool_use_response() {
        let v = json!({
            "content": [
                {"type": "text", "text": ""},
                {"type": "tool_use", "id": "toolu_01", "name": "calculator",
                 "input": {"expr": "2+2"}}
            ],
            "model": "claude-sonnet-4-20250514",
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 30, "output_tokens": 15}
        });
        let r = parse_anthropic_response(&v, "claude-sonnet-4-20250514");
        assert_eq!(r.tool_calls.len(), 1);
        assert_eq!(r.tool_calls[0].id, "toolu_01");
        assert_eq!(r.tool_calls[0].arguments, json!({"expr": "2+2"}));
        assert_eq!(r.finish_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn parse_null_input_becomes_empty_args() {
        let v = json!({
            "content": [{"type": "tool_use", "id": "t", "name": "f", "input": null}],
            "usage": {"input_tokens": 1, "output_tokens": 1}
        });
        let r = parse_anthropic_response(&v, "m");
        assert_eq!(r.tool_calls[0].arguments, json!({}));
    }

    #[test]
    fn stream_text_extraction() {
        let ev = json!({
            "type": "content_block_delta",
            "delta": {"type": "text_delta", "text": "chunk"}
        });
        assert_eq!(extract_stream_text(&ev).as_deref(), Some("chunk"));

        let other = json!({"type": "message_stop"});
        assert!(extract_stream_text(&other).is_none());
    }

    #[test]
    fn missing_key_is_auth_error() {
        let p = AnthropicProvider::new("claude-sonnet-4-20250514".into(), None, None);
        assert!(matches!(p.key(), Err(ProviderError::Auth(_))));
    }
}
