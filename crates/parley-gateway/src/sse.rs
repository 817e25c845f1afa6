// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Stream frame payloads shared by SSE, WebSocket, and the pub/sub relay.
//!
//! Every frame is one JSON object with a `type` tag: `content` chunks,
//! then exactly one terminal `done` or `error`.

use serde_json::{json, Value};

pub fn content_frame(chunk: &str) -> String {
    json!({ "type": "content", "content": chunk }).to_string()
}

pub fn done_frame() -> String {
    json!({ "type": "done" }).to_string()
}

pub fn error_frame(message: &str) -> String {
    json!({ "type": "error", "error": message }).to_string()
}

/// True when a relayed payload is a terminal frame and the subscriber can
/// close.
pub fn is_terminal(payload: &str) -> bool {
    serde_json::from_str::<Value>(payload)
        .ok()
        .and_then(|v| v["type"].as_str().map(|t| t == "done" || t == "error"))
        .unwrap_or(false)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_carry_type_tags() {
        assert!(content_frame("hi").contains("\"type\":\"content\""));
        assert!(content_frame("hi").contains("\"content\":\"hi\""));
        assert_eq!(done_frame(), r#"{"type":"done"}"#);
        assert!(error_frame("boom").contains("\"error\":\"boom\""));
    }

    #[test]
    fn terminal_detection() {
        assert!(is_terminal(&done_frame()));
        assert!(is_terminal(&error_frame("x")));
        assert!(!is_terminal(&content_frame("x")));
        assert!(!is_terminal("not json"));
    }

    #[test]
    fn content_with_quotes_stays_valid_json() {
        let frame = content_frame(r#"she said "hello""#);
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["content"], r#"she said "hello""#);
    }
}
