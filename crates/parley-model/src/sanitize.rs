// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Message sanitization: drop orphaned tool-call halves before a request is
//! built for any provider.
//!
//! Memory strategies truncate history at arbitrary boundaries, which can
//! leave an assistant tool-call without its result (or a result without its
//! call).  Providers reject both shapes, so the rule is applied uniformly
//! here rather than inside individual adapters.

use std::collections::HashSet;

use tracing::debug;

use crate::types::ChatMessage;

/// Remove tool-call requests whose id has no paired tool-result in the
/// history, and tool-result messages whose id has no paired request.
///
/// An assistant message left with neither text nor surviving tool calls is
/// dropped entirely.
pub fn drop_orphan_tool_calls(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let result_ids: HashSet<String> = messages
        .iter()
        .filter(|m| m.role == crate::Role::Tool)
        .filter_map(|m| m.tool_call_id.clone())
        .collect();
    let call_ids: HashSet<String> = messages
        .iter()
        .flat_map(|m| m.tool_calls.iter().map(|tc| tc.id.clone()))
        .collect();

    let mut out = Vec::with_capacity(messages.len());
    for mut m in messages {
        match m.role {
            crate::Role::Assistant if !m.tool_calls.is_empty() => {
                let before = m.tool_calls.len();
                m.tool_calls.retain(|tc| result_ids.contains(tc.id.as_str()));
                if m.tool_calls.len() < before {
                    debug!(
                        dropped = before - m.tool_calls.len(),
                        "dropping orphaned tool calls without results"
                    );
                }
                if m.tool_calls.is_empty() && m.content.is_empty() {
                    continue;
                }
                out.push(m);
            }
            crate::Role::Tool => {
                match &m.tool_call_id {
                    Some(id) if call_ids.contains(id) => out.push(m),
                    _ => {
                        debug!("dropping orphaned tool result without a matching call");
                    }
                }
            }
            _ => out.push(m),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatMessage, ToolCallRequest};
    use serde_json::json;

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, "calculator", json!({"expr": "2+2"}))
    }

    #[test]
    fn paired_call_and_result_survive() {
        let msgs = vec![
            ChatMessage::user("what is 2+2?"),
            ChatMessage::assistant_with_tools("", vec![call("tc-1")]),
            ChatMessage::tool_result("tc-1", "4"),
            ChatMessage::assistant("It is 4."),
        ];
        let out = drop_orphan_tool_calls(msgs);
        assert_eq!(out.len(), 4);
        assert_eq!(out[1].tool_calls.len(), 1);
    }

    #[test]
    fn orphan_call_is_removed() {
        let msgs = vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant_with_tools("", vec![call("tc-lost")]),
            ChatMessage::assistant("done"),
        ];
        let out = drop_orphan_tool_calls(msgs);
        // The empty assistant shell is dropped with its only call.
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|m| m.tool_calls.is_empty()));
    }

    #[test]
    fn orphan_call_with_text_keeps_the_text() {
        let msgs = vec![ChatMessage::assistant_with_tools("thinking…", vec![call("tc-lost")])];
        let out = drop_orphan_tool_calls(msgs);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "thinking…");
        assert!(out[0].tool_calls.is_empty());
    }

    #[test]
    fn orphan_result_is_removed() {
        let msgs = vec![
            ChatMessage::tool_result("tc-gone", "stale"),
            ChatMessage::user("continue"),
        ];
        let out = drop_orphan_tool_calls(msgs);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "continue");
    }

    #[test]
    fn partial_orphan_keeps_paired_calls() {
        let msgs = vec![
            ChatMessage::assistant_with_tools("", vec![call("tc-1"), call("tc-2")]),
            ChatMessage::tool_result("tc-1", "ok"),
        ];
        let out = drop_orphan_tool_calls(msgs);
        assert_eq!(out[0].tool_calls.len(), 1);
        assert_eq!(out[0].tool_calls[0].id, "tc-1");
    }

    #[test]
    fn plain_history_is_untouched() {
        let msgs = vec![
            ChatMessage::system("be helpful"),
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi there"),
        ];
        let out = drop_orphan_tool_calls(msgs.clone());
        assert_eq!(out.len(), msgs.len());
    }
}
