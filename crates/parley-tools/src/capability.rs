// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Capability enforcement for tool dispatch.
//!
//! Capabilities are checked ONCE, before any side effect, at dispatch time.
//! The tool list sent to the model is pre-filtered (the model cannot call
//! what it cannot see); the dispatcher re-checks anyway in case a call for
//! a filtered tool arrives regardless.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("agent lacks capability '{capability}' required for tool '{tool_name}'")]
pub struct CapabilityError {
    pub capability: String,
    pub tool_name: String,
}

/// Gate built from an agent's declared capability set plus the
/// tool-name → required-capability mapping.
#[derive(Debug, Clone, Default)]
pub struct CapabilityEnforcer {
    agent_capabilities: HashSet<String>,
    required: HashMap<String, String>,
}

impl CapabilityEnforcer {
    pub fn new(
        agent_capabilities: impl IntoIterator<Item = String>,
        required: HashMap<String, String>,
    ) -> Self {
        Self { agent_capabilities: agent_capabilities.into_iter().collect(), required }
    }

    /// True when the agent may use the tool.
    pub fn allows(&self, tool_name: &str) -> bool {
        match self.required.get(tool_name) {
            Some(cap) => self.agent_capabilities.contains(cap),
            None => true,
        }
    }

    /// Silently drop tools the agent cannot use (pre-LLM filter).
    pub fn filter_allowed<'a>(&self, tool_names: &'a [String]) -> Vec<&'a str> {
        tool_names.iter().map(|s| s.as_str()).filter(|t| self.allows(t)).collect()
    }

    /// Defense-in-depth check at dispatch time.
    pub fn require_for_tool(&self, tool_name: &str) -> Result<(), CapabilityError> {
        match self.required.get(tool_name) {
            Some(cap) if !self.agent_capabilities.contains(cap) => Err(CapabilityError {
                capability: cap.clone(),
                tool_name: tool_name.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn enforcer(caps: &[&str]) -> CapabilityEnforcer {
        let mut required = HashMap::new();
        required.insert("publish_document".to_string(), "moderate_content".to_string());
        required.insert("delete_records".to_string(), "admin_data".to_string());
        CapabilityEnforcer::new(caps.iter().map(|s| s.to_string()), required)
    }

    #[test]
    fn unmapped_tool_is_always_allowed() {
        assert!(enforcer(&[]).allows("calculator"));
    }

    #[test]
    fn mapped_tool_requires_capability() {
        assert!(!enforcer(&[]).allows("publish_document"));
        assert!(enforcer(&["moderate_content"]).allows("publish_document"));
    }

    #[test]
    fn filter_drops_denied_tools_silently() {
        let tools: Vec<String> = ["calculator", "publish_document", "delete_records"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let allowed = enforcer(&["moderate_content"]).filter_allowed(&tools);
        assert_eq!(allowed, vec!["calculator", "publish_document"]);
    }

    #[test]
    fn require_for_tool_names_the_missing_capability() {
        let err = enforcer(&[]).require_for_tool("delete_records").unwrap_err();
        assert_eq!(err.capability, "admin_data");
        assert_eq!(err.tool_name, "delete_records");
        assert!(err.to_string().contains("admin_data"));
    }

    #[test]
    fn require_for_tool_passes_when_held() {
        assert!(enforcer(&["admin_data"]).require_for_tool("delete_records").is_ok());
    }

    #[test]
    fn default_enforcer_allows_everything() {
        let e = CapabilityEnforcer::default();
        assert!(e.allows("anything"));
        assert!(e.require_for_tool("anything").is_ok());
    }
}
