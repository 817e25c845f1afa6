// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Task registry: `task_name → processor`.
//!
//! The worker dispatches into this mapping and never knows what tasks do.
//! Metadata hints (`timeout`, `max_attempts`) are advisory only — the
//! worker does not enforce them.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use sqlx::SqlitePool;

/// Metadata passed to every processor alongside its payload.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub task_name: String,
    pub attempt: i64,
    pub max_attempts: i64,
    pub user_id: Option<String>,
}

/// A processor failure, tagged with whether a retry can help.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct JobError {
    pub message: String,
    pub retryable: bool,
}

impl JobError {
    /// Validation / not-found class failures: retrying cannot help.
    pub fn terminal(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: false }
    }

    /// Provider-transient class failures: timeouts, 5xx, rate limits.
    pub fn transient(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: true }
    }
}

impl From<parley_model::ProviderError> for JobError {
    fn from(e: parley_model::ProviderError) -> Self {
        Self { retryable: e.is_retryable(), message: e.to_string() }
    }
}

impl From<parley_store::StoreError> for JobError {
    fn from(e: parley_store::StoreError) -> Self {
        // Persistence failures may be transient (pool exhaustion, lock
        // contention); a retry with a fresh handle is safe because every
        // processor is idempotent by key.
        Self { retryable: true, message: e.to_string() }
    }
}

impl From<parley_core::ChatError> for JobError {
    fn from(e: parley_core::ChatError) -> Self {
        let retryable = match &e {
            parley_core::ChatError::Busy => true,
            parley_core::ChatError::Provider(p) => p.is_retryable(),
            _ => false,
        };
        Self { retryable, message: e.to_string() }
    }
}

type ProcessorFuture = Pin<Box<dyn Future<Output = Result<Value, JobError>> + Send>>;
type Processor = Arc<dyn Fn(Value, JobContext, SqlitePool) -> ProcessorFuture + Send + Sync>;

/// Advisory hints recorded at registration.
#[derive(Debug, Clone, Default)]
pub struct TaskMeta {
    pub timeout_secs: Option<u64>,
    pub max_attempts: Option<i64>,
    pub description: Option<String>,
}

#[derive(Default)]
pub struct JobRegistry {
    processors: HashMap<String, Processor>,
    meta: HashMap<String, TaskMeta>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, name: &str, processor: F)
    where
        F: Fn(Value, JobContext, SqlitePool) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        self.register_with_meta(name, processor, TaskMeta::default());
    }

    pub fn register_with_meta<F, Fut>(&mut self, name: &str, processor: F, meta: TaskMeta)
    where
        F: Fn(Value, JobContext, SqlitePool) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        assert!(
            !self.processors.contains_key(name),
            "task '{name}' is already registered"
        );
        self.processors
            .insert(name.to_string(), Arc::new(move |p, c, db| Box::pin(processor(p, c, db))));
        self.meta.insert(name.to_string(), meta);
    }

    pub fn get(&self, name: &str) -> Option<Processor> {
        self.processors.get(name).cloned()
    }

    pub fn meta(&self, name: &str) -> Option<&TaskMeta> {
        self.meta.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processors.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
