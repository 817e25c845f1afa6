// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! HTTP/WebSocket gateway: axum routes, JWT auth, rate limiting, SSE
//! streaming, and the service bootstrap.

pub mod auth;
pub mod error;
pub mod routes;
pub mod server;
pub mod sse;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use server::{app, serve};
pub use state::{AppContext, CachedProviderFactory};
