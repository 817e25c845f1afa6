// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Driver for every OpenAI-compatible chat-completions endpoint.
//!
//! One implementation serves OpenAI itself plus the gateways that speak the
//! same wire format (Groq, Ollama).  The differences are the base URL and
//! the auth style; tool-call parsing additionally recovers the XML-ish
//! in-content calls some hosted Llama models produce.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    error::ProviderError,
    parse::{parse_inline_tool_calls, parse_tool_args},
    provider::{ChatProvider, ChunkStream},
    sanitize::drop_orphan_tool_calls,
    types::{ChatMessage, ChatRequest, ProviderResponse, Role, TokenUsage, ToolCallRequest},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// How the API key is transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    Bearer,
    None,
}

pub struct OpenAiCompatProvider {
    provider_id: String,
    model: String,
    api_key: Option<String>,
    base_url: String,
    auth: AuthStyle,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        provider_id: impl Into<String>,
        model: String,
        api_key: Option<String>,
        base_url: &str,
        auth: AuthStyle,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            model,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client"),
        }
    }

    pub fn openai(model: String, api_key: Option<String>, base_url: Option<String>) -> Self {
        Self::new(
            "openai",
            model,
            api_key,
            base_url.as_deref().unwrap_or("https://api.openai.com/v1"),
            AuthStyle::Bearer,
        )
    }

    pub fn groq(model: String, api_key: Option<String>, base_url: Option<String>) -> Self {
        Self::new(
            "groq",
            model,
            api_key,
            base_url.as_deref().unwrap_or("https://api.groq.com/openai/v1"),
            AuthStyle::Bearer,
        )
    }

    /// Ollama serves the OpenAI wire format under `/v1` and needs no key.
    pub fn ollama(model: String, base_url: &str) -> Self {
        let base = format!("{}/v1", base_url.trim_end_matches('/'));
        Self::new("ollama", model, None, &base, AuthStyle::None)
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages = build_openai_messages(&req.messages, req.system.as_deref());
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
            "stream": stream,
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self.client.post(format!("{}/chat/completions", self.base_url));
        if self.auth == AuthStyle::Bearer {
            let key = self.api_key.as_deref().ok_or_else(|| {
                ProviderError::Auth(format!("{} API key not set", self.provider_id))
            })?;
            builder = builder.bearer_auth(key);
        }
        let resp = builder.json(body).send().await.map_err(ProviderError::from_transport)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.provider_id
    }
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: ChatRequest) -> Result<ProviderResponse, ProviderError> {
        debug!(provider = %self.provider_id, model = %self.model, "chat completion");
        let body = self.build_body(&req, false);
        let resp = self.send(&body).await?;
        let v: Value = resp.json().await.map_err(ProviderError::from_transport)?;
        Ok(parse_openai_response(&v, &self.model, &self.provider_id))
    }

    async fn stream(&self, req: ChatRequest) -> Result<ChunkStream, ProviderError> {
        debug!(provider = %self.provider_id, model = %self.model, "chat stream");
        let body = self.build_body(&req, true);
        let resp = self.send(&body).await?;

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
                            let Some(data) = line.strip_prefix("data: ") else { continue };
                            let data = data.trim();
                            if data == "[DONE]" {
                                continue;
                            }
                            if let Ok(event) = serde_json::from_str::<Value>(data) {
                                let delta = event["choices"][0]["delta"]["content"]
                                    .as_str()
                                    .unwrap_or_default();
                                if !delta.is_empty() {
                                    out.push(Ok(delta.to_string()));
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

/// Convert canonical messages into the chat-completions wire format.
///
/// The system prompt becomes the leading message; orphaned tool-call halves
/// are dropped uniformly, matching the Anthropic driver.
pub(crate) fn build_openai_messages(
    messages: &[ChatMessage],
    system: Option<&str>,
) -> Vec<Value> {
    let messages = drop_orphan_tool_calls(messages.to_vec());
    let mut out: Vec<Value> = Vec::new();

    // A system message inside the history wins over the request-level prompt.
    let history_system = messages
        .iter()
        .find(|m| m.role == Role::System)
        .map(|m| m.content.clone());
    if let Some(sys) = history_system.or_else(|| system.map(|s| s.to_string())) {
        if !sys.is_empty() {
            out.push(json!({ "role": "system", "content": sys }));
        }
    }

    for m in &messages {
        match m.role {
            Role::System => {}
            Role::Tool => out.push(json!({
                "role": "tool",
                "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
                "content": m.content,
            })),
            Role::Assistant if m.has_tool_calls() => {
                let tool_calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                let content = if m.content.is_empty() {
                    Value::Null
                } else {
                    Value::String(m.content.clone())
                };
                out.push(json!({
                    "role": "assistant",
                    "content": content,
                    "tool_calls": tool_calls,
                }));
            }
            Role::Assistant => out.push(json!({ "role": "assistant", "content": m.content })),
            Role::User => out.push(json!({ "role": "user", "content": m.content })),
        }
    }
    out
}

/// Parse a chat-completions response into canonical form.
///
/// Native `tool_calls` take priority; when absent, in-content XML-style
/// calls are recovered and stripped from the text.
pub(crate) fn parse_openai_response(v: &Value, model: &str, provider: &str) -> ProviderResponse {
    let message = &v["choices"][0]["message"];
    let mut content = message["content"].as_str().unwrap_or_default().to_string();

    let mut tool_calls: Vec<ToolCallRequest> = Vec::new();
    if let Some(raw_calls) = message["tool_calls"].as_array() {
        for (i, tc) in raw_calls.iter().enumerate() {
            let func = &tc["function"];
            let name = func["name"].as_str().unwrap_or_default();
            if name.is_empty() {
                continue;
            }
            let id = tc["id"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("call_{i}"));
            tool_calls.push(ToolCallRequest::new(id, name, parse_tool_args(func.get("arguments"))));
        }
    }
    if tool_calls.is_empty() && !content.is_empty() {
        let (cleaned, inline) = parse_inline_tool_calls(&content);
        if !inline.is_empty() {
            content = cleaned;
            tool_calls = inline;
        }
    }

    ProviderResponse {
        content,
        usage: TokenUsage {
            input: v["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output: v["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            cost: None,
        },
        model: v["model"].as_str().unwrap_or(model).to_string(),
        provider: provider.to_string(),
        tool_calls,
        finish_reason: v["choices"][0]["finish_reason"].as_str().map(|s| s.to_string()),
        raw: v.clone(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
