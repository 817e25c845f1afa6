// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// A single tool invocation requested by the model.
///
/// Mirrors the model crate's request shape but keeps this crate independent
/// of it; the runtime converts between the two.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier from the model, echoed back verbatim.
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self { id: id.into(), name: name.into(), args: args.into() }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Execution(String),
    #[error("tool timed out")]
    Timeout,
}

/// What went wrong, for callers that branch on failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    NotFound,
    CapabilityDenied,
    InvalidArguments,
    Execution,
    Timeout,
    Panicked,
}

/// Outcome of one tool execution — a sum type so callers must branch.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Ok(String),
    Err { message: String, kind: ToolErrorKind },
}

/// The result paired back to its originating call.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Exact echo of the call's id.
    pub tool_call_id: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { tool_call_id: call_id.into(), outcome: ToolOutcome::Ok(content.into()) }
    }

    pub fn err(call_id: impl Into<String>, message: impl Into<String>, kind: ToolErrorKind) -> Self {
        Self {
            tool_call_id: call_id.into(),
            outcome: ToolOutcome::Err { message: message.into(), kind },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Err { .. })
    }

    /// The content persisted as the tool message, error or not.
    pub fn content(&self) -> &str {
        match &self.outcome {
            ToolOutcome::Ok(c) => c,
            ToolOutcome::Err { message, .. } => message,
        }
    }
}

/// Trait every tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> Value;
    /// Capability an agent must hold to use this tool; `None` = open.
    fn required_capability(&self) -> Option<&str> {
        None
    }
    /// Execute with parsed arguments.  Non-string results are serialized to
    /// JSON by the dispatcher.
    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_ok_echoes_call_id() {
        let r = ToolResult::ok("tc-1", "42");
        assert_eq!(r.tool_call_id, "tc-1");
        assert!(!r.is_error());
        assert_eq!(r.content(), "42");
    }

    #[test]
    fn result_err_carries_kind_and_message() {
        let r = ToolResult::err("tc-2", "boom", ToolErrorKind::Execution);
        assert!(r.is_error());
        assert_eq!(r.content(), "boom");
        match r.outcome {
            ToolOutcome::Err { kind, .. } => assert_eq!(kind, ToolErrorKind::Execution),
            _ => panic!("expected error outcome"),
        }
    }

    struct OpenTool;

    #[async_trait]
    impl Tool for OpenTool {
        fn name(&self) -> &str {
            "open"
        }
        fn description(&self) -> &str {
            "no capability required"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            Ok(json!("ok"))
        }
    }

    #[test]
    fn default_capability_is_none() {
        assert!(OpenTool.required_capability().is_none());
    }
}
