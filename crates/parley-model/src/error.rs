// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Failure taxonomy for provider calls.
///
/// The split matters downstream: the job worker retries only
/// [`ProviderError::is_retryable`] failures, and the gateway maps each
/// variant to a distinct HTTP status.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP 429 or an SDK-level rate-limit signal.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Missing or rejected credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Timeout, connection failure, or 5xx from the provider.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The prompt exceeds the model's context window.
    #[error("context too long: {0}")]
    ContextTooLong(String),

    /// Anything else the provider rejected.
    #[error("provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Classify an HTTP error status + body into the taxonomy.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            429 => ProviderError::RateLimited(truncate(body)),
            401 | 403 => ProviderError::Auth(truncate(body)),
            413 => ProviderError::ContextTooLong(truncate(body)),
            400 if looks_like_context_overflow(body) => {
                ProviderError::ContextTooLong(truncate(body))
            }
            s if s >= 500 => ProviderError::Unavailable(format!("HTTP {s}: {}", truncate(body))),
            s => ProviderError::Other(format!("HTTP {s}: {}", truncate(body))),
        }
    }

    /// Wrap a transport-level reqwest failure.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ProviderError::Unavailable(err.to_string())
        } else {
            ProviderError::Other(err.to_string())
        }
    }

    /// Transient failures that a queue worker may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_) | ProviderError::Unavailable(_))
    }
}

fn looks_like_context_overflow(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("context length")
        || lower.contains("context_length")
        || lower.contains("maximum context")
        || lower.contains("too many tokens")
        || lower.contains("prompt is too long")
}

fn truncate(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
