// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Tool-call normalization shared by all provider adapters.
//!
//! Two concerns live here:
//!
//! 1. [`parse_tool_args`] — argument strings arrive from the wire as JSON
//!    objects, JSON-encoded strings, *double*-encoded strings, empty
//!    strings, or `null`.  Everything normalizes to a JSON object.
//! 2. [`parse_inline_tool_calls`] — some open-source models emit tool calls
//!    as XML-ish text (`<function=name>{json}</function>`) instead of using
//!    the native protocol, with several malformed variants observed in the
//!    wild (parenthesized names, missing separators, unclosed tags,
//!    escape-quoted JSON).  These are recovered from the content and removed
//!    from the visible text.

use regex::Regex;
use serde_json::Value;

use crate::types::ToolCallRequest;

/// Normalize a raw argument payload into a JSON object.
///
/// Accepts `null`, an object, or a string containing JSON (possibly encoded
/// twice).  Anything unparsable becomes an empty object rather than an
/// error — the tool layer reports schema problems, not the wire parser.
pub fn parse_tool_args(raw: Option<&Value>) -> Value {
    match raw {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::String(s)) => parse_args_str(s),
        Some(other) => other.clone(),
    }
}

/// Parse an argument string, unwrapping one level of double encoding.
pub fn parse_args_str(s: &str) -> Value {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str::<Value>(trimmed) {
        // Double-encoded: the string parsed to another string that itself
        // holds the JSON object.
        Ok(Value::String(inner)) => {
            serde_json::from_str(&inner).unwrap_or(Value::Object(Default::default()))
        }
        Ok(v) => v,
        Err(_) => Value::Object(Default::default()),
    }
}

/// One recovery pattern for in-content tool calls.
///
/// Ordered most-specific first; unclosed-tag patterns last so they cannot
/// shadow a well-formed match.
const INLINE_PATTERNS: &[&str] = &[
    // <function=name {json}</function> — greedy, tolerates nested braces
    r"(?s)<function=(\w+)\s+(\{.*\})\s*</function>",
    // <function=name({json})</function> — parentheses around args
    r"(?s)<function=(\w+)\((\{.+?\})\)</function>",
    // <function(name)={json}</function> — parentheses around the name
    r"(?s)<function\((\w+)\)=\s*(\{.+?\})\s*</function>",
    r"(?s)<function\((\w+)\)>\s*(\{.+?\})\s*</function>",
    r"(?s)<function\((\w+)\)\s*(\{.+?\})\s*</function>",
    // <function=name>{json}</function> — the common form
    r"(?s)<function=(\w+)>\s*(\{.+?\})\s*</function>",
    // no separator at all between name and JSON
    r"(?s)<function=(\w+)(\{.+?\})</function>",
    // quoted, escape-encoded JSON
    r#"(?s)<function\((\w+)\)\s*"(.+?)"\s*</function>"#,
    // unclosed tags (truncated generations)
    r"(?s)<function=(\w+)>(\{.+?\})\s*$",
    r"(?s)<function=(\w+)(\{.+\})\s*$",
    r"(?s)<function=(\w+)\s+(\{.+\})\s*$",
    r"(?s)<function\((\w+)\)=\s*(\{.+\})\s*$",
];

fn inline_regexes() -> &'static Vec<Regex> {
    use std::sync::OnceLock;
    static REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();
    REGEXES.get_or_init(|| {
        INLINE_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("inline tool-call pattern must compile"))
            .collect()
    })
}

/// Recover XML-style tool calls from model output text.
///
/// Returns `(cleaned_content, tool_calls)`.  Matched spans are removed from
/// the content; spans already claimed by an earlier (more specific) pattern
/// are never re-matched.
pub fn parse_inline_tool_calls(content: &str) -> (String, Vec<ToolCallRequest>) {
    let mut calls: Vec<ToolCallRequest> = Vec::new();
    let mut cleaned = content.to_string();
    let mut claimed: Vec<(usize, usize)> = Vec::new();

    for re in inline_regexes() {
        for caps in re.captures_iter(content) {
            let m = caps.get(0).expect("whole match");
            let span = (m.start(), m.end());
            if claimed.iter().any(|&(s, e)| span.0 < e && s < span.1) {
                continue;
            }
            let name = caps.get(1).map(|g| g.as_str()).unwrap_or_default();
            let json_part = caps.get(2).map(|g| g.as_str()).unwrap_or_default().trim();

            let Some(args) = extract_balanced_json(json_part) else {
                continue;
            };
            calls.push(ToolCallRequest::new(
                format!("inline_{name}_{}", calls.len()),
                name,
                args,
            ));
            claimed.push(span);
            cleaned = cleaned.replacen(m.as_str(), "", 1);
        }
    }

    if !calls.is_empty() {
        cleaned = cleaned.trim().to_string();
        tracing::debug!(count = calls.len(), "recovered inline tool calls from content");
    }
    (cleaned, calls)
}

/// Pull the first balanced `{…}` object out of a fragment and parse it.
///
/// Escape-quoted fragments (`{\"a\": 1}`) are unescaped first.
fn extract_balanced_json(fragment: &str) -> Option<Value> {
    let mut text = fragment.to_string();
    if text.contains("\\\"") || text.contains("\\n") {
        text = text.replace("\\\"", "\"").replace("\\n", "\n").replace("\\\\", "\\");
    }
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut end = None;
    for (i, c) in text.char_indices().skip_while(|(i, _)| *i < start) {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    end = Some(i + 1);
                    break;
                }
            }
            _ => {}
        }
    }
    serde_json::from_str(&text[start..end?]).ok()
}

/// True when the text still carries tool-call-looking XML the parser could
/// not recover.  Callers may use this to ask the model to retry with the
/// native protocol.
pub fn contains_malformed_tool_call(text: &str) -> bool {
    text.contains("<function") || text.contains("<tool_call")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── parse_tool_args ───────────────────────────────────────────────────────

    #[test]
    fn none_becomes_empty_object() {
        assert_eq!(parse_tool_args(None), json!({}));
        assert_eq!(parse_tool_args(Some(&Value::Null)), json!({}));
    }

    #[test]
    fn object_passes_through() {
        let v = json!({"a": 1});
        assert_eq!(parse_tool_args(Some(&v)), v);
    }

    #[test]
    fn json_string_is_parsed() {
        let v = json!(r#"{"expr": "2+2"}"#);
        assert_eq!(parse_tool_args(Some(&v)), json!({"expr": "2+2"}));
    }

    #[test]
    fn double_encoded_string_is_unwrapped() {
        // The wire value is a string whose content is ANOTHER JSON string.
        let outer = serde_json::to_string(r#"{"expr": "2+2"}"#).unwrap();
        assert_eq!(parse_args_str(&outer), json!({"expr": "2+2"}));
    }

    #[test]
    fn empty_string_becomes_empty_object() {
        assert_eq!(parse_args_str(""), json!({}));
        assert_eq!(parse_args_str("   "), json!({}));
    }

    #[test]
    fn garbage_string_becomes_empty_object() {
        assert_eq!(parse_args_str("not json at all"), json!({}));
    }

    // ── parse_inline_tool_calls ───────────────────────────────────────────────

    #[test]
    fn standard_form_is_recovered() {
        let (cleaned, calls) =
            parse_inline_tool_calls(r#"<function=calculator>{"expr": "2+2"}</function>"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "calculator");
        assert_eq!(calls[0].arguments, json!({"expr": "2+2"}));
        assert!(cleaned.is_empty());
    }

    #[test]
    fn no_separator_form_is_recovered() {
        let (_, calls) =
            parse_inline_tool_calls(r#"<function=search{"query": "refund policy"}</function>"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments, json!({"query": "refund policy"}));
    }

    #[test]
    fn parenthesized_name_form_is_recovered() {
        let (_, calls) =
            parse_inline_tool_calls(r#"<function(update_context)={"name": "Phil"}</function>"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "update_context");
    }

    #[test]
    fn parenthesized_args_form_is_recovered() {
        let (_, calls) =
            parse_inline_tool_calls(r#"<function=calc({"expr": "1+1"})</function>"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({"expr": "1+1"}));
    }

    #[test]
    fn unclosed_tag_is_recovered() {
        let (_, calls) = parse_inline_tool_calls(r#"<function=calc>{"expr": "3*3"}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({"expr": "3*3"}));
    }

    #[test]
    fn escape_quoted_json_is_unescaped() {
        let (_, calls) =
            parse_inline_tool_calls(r#"<function(calc) "{\"expr\": \"5-2\"}"</function>"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({"expr": "5-2"}));
    }

    #[test]
    fn surrounding_text_is_preserved() {
        let (cleaned, calls) = parse_inline_tool_calls(
            r#"Let me check. <function=search>{"query": "hours"}</function> One moment."#,
        );
        assert_eq!(calls.len(), 1);
        assert!(cleaned.contains("Let me check."));
        assert!(cleaned.contains("One moment."));
        assert!(!cleaned.contains("<function"));
    }

    #[test]
    fn nested_braces_survive() {
        let (_, calls) = parse_inline_tool_calls(
            r#"<function=update_context {"prefs": {"lang": "sv"}}</function>"#,
        );
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({"prefs": {"lang": "sv"}}));
    }

    #[test]
    fn plain_text_yields_nothing() {
        let (cleaned, calls) = parse_inline_tool_calls("The answer is 4.");
        assert!(calls.is_empty());
        assert_eq!(cleaned, "The answer is 4.");
    }

    #[test]
    fn invalid_json_is_skipped() {
        let (_, calls) = parse_inline_tool_calls("<function=broken>{not json}</function>");
        assert!(calls.is_empty());
    }

    #[test]
    fn each_call_gets_a_distinct_id() {
        let (_, calls) = parse_inline_tool_calls(
            r#"<function=a>{"x": 1}</function> <function=b>{"y": 2}</function>"#,
        );
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[test]
    fn malformed_detector_flags_leftovers() {
        assert!(contains_malformed_tool_call("<function=x oops"));
        assert!(contains_malformed_tool_call("<tool_call>…"));
        assert!(!contains_malformed_tool_call("normal text"));
    }
}
