// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Tool system: the [`Tool`] trait, the registry, a parallel dispatcher
//! with per-call error capture, and capability enforcement.

pub mod builtin;
mod capability;
mod registry;
mod tool;

pub use capability::{CapabilityEnforcer, CapabilityError};
pub use registry::{execute_tool_calls, ToolRegistry, ToolSchema};
pub use tool::{Tool, ToolCall, ToolError, ToolErrorKind, ToolOutcome, ToolResult};
