// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolError};

/// Where context updates land.  The runtime binds this to the persistent
/// user-context store, scoped to the requesting user; tests use an
/// in-memory sink.
#[async_trait]
pub trait ContextSink: Send + Sync {
    /// Deep-merge `updates` into the stored context and return the merged
    /// result.
    async fn apply(&self, updates: Value, reason: &str) -> Result<Value, String>;
}

/// Persist facts about the user (name, preferences, goals) across
/// conversations.
pub struct UpdateContextTool {
    sink: Arc<dyn ContextSink>,
}

impl UpdateContextTool {
    pub fn new(sink: Arc<dyn ContextSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Tool for UpdateContextTool {
    fn name(&self) -> &str {
        "update_context"
    }

    fn description(&self) -> &str {
        "Save facts about the user for future conversations (name, preferences, goals). \
         Set a key to null to delete it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "updates": {
                    "type": "object",
                    "description": "Keys to merge into the user's stored context"
                },
                "reason": {
                    "type": "string",
                    "description": "Why this update is being made"
                }
            },
            "required": ["updates"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let updates = args
            .get("updates")
            .cloned()
            .filter(|v| v.is_object())
            .ok_or_else(|| ToolError::InvalidArguments("missing 'updates' object".into()))?;
        let reason = args.get("reason").and_then(|v| v.as_str()).unwrap_or("tool update");
        let merged = self.sink.apply(updates, reason).await.map_err(ToolError::Execution)?;
        Ok(json!({ "status": "saved", "context": merged }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct RecordingSink {
        last: Mutex<Option<(Value, String)>>,
    }

    #[async_trait]
    impl ContextSink for RecordingSink {
        async fn apply(&self, updates: Value, reason: &str) -> Result<Value, String> {
            *self.last.lock().unwrap() = Some((updates.clone(), reason.to_string()));
            Ok(updates)
        }
    }

    #[tokio::test]
    async fn forwards_updates_and_reason() {
        let sink = Arc::new(RecordingSink { last: Mutex::new(None) });
        let tool = UpdateContextTool::new(Arc::clone(&sink) as Arc<dyn ContextSink>);
        let out = tool
            .execute(json!({
                "updates": {"name": "Phil"},
                "reason": "user introduced themselves"
            }))
            .await
            .unwrap();
        assert_eq!(out["status"], "saved");
        let (updates, reason) = sink.last.lock().unwrap().clone().unwrap();
        assert_eq!(updates, json!({"name": "Phil"}));
        assert_eq!(reason, "user introduced themselves");
    }

    #[tokio::test]
    async fn missing_updates_is_invalid() {
        let sink = Arc::new(RecordingSink { last: Mutex::new(None) });
        let tool = UpdateContextTool::new(sink);
        let err = tool.execute(json!({"reason": "nothing"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn non_object_updates_is_invalid() {
        let sink = Arc::new(RecordingSink { last: Mutex::new(None) });
        let tool = UpdateContextTool::new(sink);
        let err = tool.execute(json!({"updates": "a string"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    struct FailingSink;

    #[async_trait]
    impl ContextSink for FailingSink {
        async fn apply(&self, _updates: Value, _reason: &str) -> Result<Value, String> {
            Err("store unavailable".into())
        }
    }

    #[tokio::test]
    async fn sink_failure_becomes_execution_error() {
        let tool = UpdateContextTool::new(Arc::new(FailingSink));
        let err = tool.execute(json!({"updates": {}})).await.unwrap_err();
        assert!(matches!(err, ToolError::Execution(_)));
    }
}
