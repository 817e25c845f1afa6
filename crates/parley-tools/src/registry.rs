// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::{
    capability::CapabilityEnforcer,
    tool::{Tool, ToolCall, ToolErrorKind, ToolResult},
    ToolError,
};

/// Per-tool execution timeout.
const TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// A tool schema as sent to providers — mirrors the model crate's shape but
/// keeps this crate independent from it.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Central registry holding all available tools.
///
/// Cloning is cheap (the tools are shared); the runtime clones the base
/// registry per request to add user-bound tools without mutating the
/// shared one.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// The tool-name → required-capability mapping derived from tool
    /// declarations, for building a [`CapabilityEnforcer`].
    pub fn required_capabilities(&self) -> HashMap<String, String> {
        self.tools
            .values()
            .filter_map(|t| {
                t.required_capability().map(|c| (t.name().to_string(), c.to_string()))
            })
            .collect()
    }

    /// Schemas for a selection of tool names, in the order given.
    /// Unknown names are skipped with a warning.
    pub fn schemas_for(&self, names: &[&str]) -> Vec<ToolSchema> {
        names
            .iter()
            .filter_map(|name| match self.tools.get(*name) {
                Some(t) => Some(ToolSchema {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters_schema(),
                }),
                None => {
                    warn!(tool = *name, "agent references unregistered tool");
                    None
                }
            })
            .collect()
    }

    /// Execute one call with timeout, capturing errors in the result.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolResult::err(
                &call.id,
                format!("Tool not found: {}", call.name),
                ToolErrorKind::NotFound,
            );
        };
        match tokio::time::timeout(TOOL_TIMEOUT, tool.execute(call.args.clone())).await {
            Ok(Ok(value)) => {
                let content = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                ToolResult::ok(&call.id, content)
            }
            Ok(Err(ToolError::InvalidArguments(msg))) => ToolResult::err(
                &call.id,
                format!("Error: {msg}"),
                ToolErrorKind::InvalidArguments,
            ),
            Ok(Err(ToolError::Timeout)) => {
                ToolResult::err(&call.id, "Error: tool timed out", ToolErrorKind::Timeout)
            }
            Ok(Err(ToolError::Execution(msg))) => {
                ToolResult::err(&call.id, format!("Error: {msg}"), ToolErrorKind::Execution)
            }
            Err(_) => ToolResult::err(
                &call.id,
                format!("Error: tool '{}' timed out after {}s", call.name, TOOL_TIMEOUT.as_secs()),
                ToolErrorKind::Timeout,
            ),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Execute a batch of tool calls in parallel.
///
/// Each call runs in its own task: one tool's failure (or panic) never
/// cancels another, and results come back in call order with every
/// `tool_call_id` echoed exactly.  Capability checks happen here, BEFORE
/// any tool code runs.
pub async fn execute_tool_calls(
    registry: &Arc<ToolRegistry>,
    enforcer: &CapabilityEnforcer,
    calls: &[ToolCall],
) -> Vec<ToolResult> {
    let mut tasks = Vec::with_capacity(calls.len());
    for call in calls {
        if let Err(e) = enforcer.require_for_tool(&call.name) {
            let result = ToolResult::err(
                &call.id,
                format!("Error: {e}"),
                ToolErrorKind::CapabilityDenied,
            );
            tasks.push(Err(result));
            continue;
        }
        let registry = Arc::clone(registry);
        let call = call.clone();
        tasks.push(Ok(tokio::spawn(async move { registry.execute(&call).await })));
    }

    let mut results = Vec::with_capacity(calls.len());
    for (i, task) in tasks.into_iter().enumerate() {
        match task {
            Err(denied) => results.push(denied),
            Ok(handle) => match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    results.push(ToolResult::err(
                        &calls[i].id,
                        format!("Error: tool execution panicked: {e}"),
                        ToolErrorKind::Panicked,
                    ));
                }
            },
        }
    }
    results
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::tool::{Tool, ToolError};

    struct EchoTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its arguments"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, args: Value) -> Result<Value, ToolError> {
            Ok(json!({ "echo": args }))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            Err(ToolError::Execution("deliberate failure".into()))
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "panicking"
        }
        fn description(&self) -> &str {
            "panics"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            panic!("tool blew up");
        }
    }

    struct GatedTool;

    #[async_trait]
    impl Tool for GatedTool {
        fn name(&self) -> &str {
            "gated"
        }
        fn description(&self) -> &str {
            "requires a capability"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn required_capability(&self) -> Option<&str> {
            Some("secret_access")
        }
        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            Ok(json!("secret"))
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        reg.register(FailingTool);
        reg.register(PanickingTool);
        reg.register(GatedTool);
        Arc::new(reg)
    }

    fn open_enforcer(reg: &ToolRegistry) -> CapabilityEnforcer {
        CapabilityEnforcer::new(
            ["secret_access".to_string()],
            reg.required_capabilities(),
        )
    }

    #[tokio::test]
    async fn execute_known_tool_succeeds() {
        let reg = registry();
        let out = reg.execute(&ToolCall::new("1", "echo", json!({"x": 1}))).await;
        assert!(!out.is_error());
        assert!(out.content().contains("\"x\":1"));
    }

    #[tokio::test]
    async fn unknown_tool_is_error_result() {
        let reg = registry();
        let out = reg.execute(&ToolCall::new("x", "missing", json!({}))).await;
        assert!(out.is_error());
        assert!(out.content().contains("Tool not found"));
    }

    #[tokio::test]
    async fn string_results_pass_through_unquoted() {
        let reg = registry();
        let out = reg.execute(&ToolCall::new("1", "gated", json!({}))).await;
        assert_eq!(out.content(), "secret");
    }

    #[tokio::test]
    async fn batch_preserves_order_and_call_ids() {
        let reg = registry();
        let calls = vec![
            ToolCall::new("a", "echo", json!({"n": 1})),
            ToolCall::new("b", "failing", json!({})),
            ToolCall::new("c", "echo", json!({"n": 3})),
        ];
        let results = execute_tool_calls(&reg, &open_enforcer(&reg), &calls).await;
        let ids: Vec<&str> = results.iter().map(|r| r.tool_call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(!results[0].is_error());
        assert!(results[1].is_error());
        assert!(!results[2].is_error());
    }

    #[tokio::test]
    async fn one_panic_does_not_cancel_others() {
        let reg = registry();
        let calls = vec![
            ToolCall::new("p", "panicking", json!({})),
            ToolCall::new("e", "echo", json!({})),
        ];
        let results = execute_tool_calls(&reg, &open_enforcer(&reg), &calls).await;
        assert!(results[0].is_error());
        assert!(results[0].content().contains("panicked"));
        assert!(!results[1].is_error());
    }

    #[tokio::test]
    async fn capability_denied_before_any_execution() {
        let reg = registry();
        let enforcer = CapabilityEnforcer::new(
            Vec::<String>::new(),
            reg.required_capabilities(),
        );
        let calls = vec![ToolCall::new("g", "gated", json!({}))];
        let results = execute_tool_calls(&reg, &enforcer, &calls).await;
        assert!(results[0].is_error());
        assert!(results[0].content().contains("secret_access"));
        match &results[0].outcome {
            crate::ToolOutcome::Err { kind, .. } => {
                assert_eq!(*kind, ToolErrorKind::CapabilityDenied)
            }
            _ => panic!("expected denial"),
        }
    }

    #[test]
    fn schemas_for_skips_unknown_names() {
        let reg = registry();
        let schemas = reg.schemas_for(&["echo", "nonexistent", "gated"]);
        let names: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "gated"]);
    }

    #[test]
    fn required_capabilities_only_lists_gated_tools() {
        let reg = registry();
        let map = reg.required_capabilities();
        assert_eq!(map.get("gated").map(|s| s.as_str()), Some("secret_access"));
        assert!(!map.contains_key("echo"));
    }

    #[test]
    fn registering_same_name_twice_overwrites() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "t" });
        reg.register(EchoTool { name: "t" });
        assert_eq!(reg.names().len(), 1);
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        let reg = registry();
        let results = execute_tool_calls(&reg, &open_enforcer(&reg), &[]).await;
        assert!(results.is_empty());
    }
}
