// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Durable job queue over Redis lists and the `jobs` table: enqueue
//! client, worker loop with retry/backoff, and the core task processors.

mod client;
mod registry;
mod worker;
pub mod processors;

pub use client::{queue_key, stream_channel, JobClient, JobClientError};
pub use processors::{register_core_tasks, WorkerServices};
pub use registry::{JobContext, JobError, JobRegistry, TaskMeta};
pub use worker::Worker;
