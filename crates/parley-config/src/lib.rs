// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Service configuration from `AGENT_`-prefixed environment variables.
//!
//! [`Settings`] is built once at startup and never mutated afterwards.
//! Every field can be overridden with `AGENT_<NAME>`; the un-prefixed
//! variable is consulted as a fallback so conventional names such as
//! `REDIS_URL` and `OPENAI_API_KEY` keep working.

mod schema;

pub use schema::{DatabaseSettings, Settings};

/// Read an env var, preferring the `AGENT_` prefix.
pub(crate) fn env_var(key: &str) -> Option<String> {
    std::env::var(format!("AGENT_{key}"))
        .or_else(|_| std::env::var(key))
        .ok()
        .filter(|v| !v.is_empty())
}

pub(crate) fn env_or(key: &str, default: &str) -> String {
    env_var(key).unwrap_or_else(|| default.to_string())
}

/// Boolean env vars accept `true`/`1`/`yes` (case-insensitive).
pub(crate) fn env_bool(key: &str, default: bool) -> bool {
    match env_var(key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        None => default,
    }
}

pub(crate) fn env_u64(key: &str, default: u64) -> u64 {
    env_var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

pub(crate) fn env_f64(key: &str, default: f64) -> f64 {
    env_var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
