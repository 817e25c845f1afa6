// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Typed stores over the database with authorization scope injection.
//!
//! Every read/write that touches workspace-scoped data takes a
//! [`authz::CurrentUser`] and composes a scope fragment into its SQL.
//! Stores never return rows the caller cannot see, and out-of-scope is
//! indistinguishable from absent.

pub mod authz;
pub mod db;
mod agents;
mod analytics;
mod documents;
mod error;
mod jobs;
mod messages;
mod threads;
mod user_context;
mod workspaces;

pub use agents::{Agent, AgentCreate, AgentStore, AgentUpdate};
pub use analytics::{AnalyticsStore, LlmCall, Metrics, Period, UsageBucket};
pub use authz::CurrentUser;
pub use documents::{
    ChunkHit, Document, DocumentChunk, DocumentCreate, DocumentStore, NewChunk,
};
pub use error::{StoreError, StoreResult, VisibilityError};
pub use jobs::{Job, JobStore};
pub use messages::{Message, MessageStore, NewMessage};
pub use threads::{Thread, ThreadStore};
pub use user_context::{deep_merge, UserContextStore};
pub use workspaces::{Workspace, WorkspaceMember, WorkspaceStore};
