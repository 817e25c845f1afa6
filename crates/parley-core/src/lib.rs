// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The agent runtime core: cost tracking, per-thread locks, user context,
//! and the chat state machine.

mod context;
mod costs;
mod locks;
mod runtime;

pub use context::{
    render_system_prompt, ScopedDocumentSearcher, UserContextProvider, UserContextSink,
};
pub use costs::{BudgetExceededError, CostTracker};
pub use locks::{LockError, LockGuard, LockManager, LockStats, DEFAULT_LOCK_TTL, NS_THREAD, NS_USER_CONTEXT};
pub use runtime::{
    AgentRuntime, CallType, ChatError, ChatOptions, ChatOutcome, ModelSpec, ProviderFactory,
};
