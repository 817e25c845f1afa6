// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Memory strategies: transform persisted message history into an LLM-ready
//! context window.
//!
//! Strategies consume [`HistoryMessage`]s (what the store returns) and
//! produce [`ChatMessage`]s (what a provider accepts).  Tool-call payloads
//! never survive the transformation — they are audit detail; the runtime
//! re-attaches in-flight tool traffic for the current turn itself.

mod last_n;
mod summarize;
mod token_window;
mod vector;

pub use last_n::{FirstLastMemory, LastNMemory};
pub use summarize::{SummarizationHelper, SummarizeMemory};
pub use token_window::TokenWindowMemory;
pub use vector::VectorMemory;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use parley_model::{embeddings::Embedder, ChatMessage};

/// A persisted message as seen by memory strategies.
#[derive(Debug, Clone)]
pub struct HistoryMessage {
    pub id: String,
    pub role: String,
    pub content: String,
}

impl HistoryMessage {
    pub fn new(id: impl Into<String>, role: impl Into<String>, content: impl Into<String>) -> Self {
        Self { id: id.into(), role: role.into(), content: content.into() }
    }

    pub fn is_user(&self) -> bool {
        self.role == "user"
    }

    /// Tool traffic is audit-only; strategies drop it from built context.
    pub fn is_context_visible(&self) -> bool {
        self.role == "user" || self.role == "assistant"
    }
}

/// Everything a strategy may consult when building context.
pub struct ContextInput<'a> {
    pub messages: &'a [HistoryMessage],
    pub system_prompt: Option<&'a str>,
    /// Model context limit, when known.
    pub max_tokens: Option<u32>,
    /// Rolling summary stored on the thread (summarize strategy).
    pub thread_summary: Option<&'a str>,
}

#[async_trait]
pub trait MemoryStrategy: Send + Sync {
    /// Strategy name for audit metadata.
    fn name(&self) -> &str;

    async fn build(&self, input: ContextInput<'_>) -> Vec<ChatMessage>;
}

/// Typed per-strategy configuration (the agent row stores strategy name +
/// a JSON params object; unknown fields are ignored, unknown strategies
/// fall back to last-n).
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryParams {
    LastN { n: usize },
    FirstLast { n: usize },
    TokenWindow { max_tokens: usize, reserve_output: usize },
    Summarize {
        recent_chars: usize,
        summarize_threshold_chars: usize,
        summary_chars_min: usize,
        summary_chars_max: usize,
    },
    Vector { top_k: usize, min_score: f32 },
}

impl MemoryParams {
    pub fn strategy_name(&self) -> &'static str {
        match self {
            MemoryParams::LastN { .. } => "last_n",
            MemoryParams::FirstLast { .. } => "first_last",
            MemoryParams::TokenWindow { .. } => "token_window",
            MemoryParams::Summarize { .. } => "summarize",
            MemoryParams::Vector { .. } => "vector",
        }
    }

    /// Parse a strategy name + params JSON as stored on the agent row.
    pub fn parse(strategy: &str, params: &Value) -> Self {
        let usize_of = |key: &str, default: usize| {
            params.get(key).and_then(|v| v.as_u64()).map(|v| v as usize).unwrap_or(default)
        };
        match strategy {
            "last_n" => MemoryParams::LastN { n: usize_of("n", 20) },
            "first_last" => MemoryParams::FirstLast { n: usize_of("n", 20) },
            "token_window" => MemoryParams::TokenWindow {
                max_tokens: usize_of("max_tokens", 100_000),
                reserve_output: usize_of("reserve_output", 4096),
            },
            "summarize" => MemoryParams::Summarize {
                recent_chars: usize_of("recent_chars", 8000),
                summarize_threshold_chars: usize_of("summarize_threshold_chars", 16_000),
                summary_chars_min: usize_of("summary_chars_min", 500),
                summary_chars_max: usize_of("summary_chars_max", 8000),
            },
            "vector" => MemoryParams::Vector {
                top_k: usize_of("top_k", 10),
                min_score: params
                    .get("min_score")
                    .and_then(|v| v.as_f64())
                    .map(|v| v as f32)
                    .unwrap_or(0.5),
            },
            other => {
                warn!(strategy = other, "unknown memory strategy; falling back to last_n");
                MemoryParams::LastN { n: usize_of("n", 20) }
            }
        }
    }

    /// Instantiate the configured strategy.
    ///
    /// The vector strategy degrades to last-n when no embedder is wired in.
    pub fn build_strategy(&self, embedder: Option<Arc<dyn Embedder>>) -> Arc<dyn MemoryStrategy> {
        match self {
            MemoryParams::LastN { n } => Arc::new(LastNMemory::new(*n)),
            MemoryParams::FirstLast { n } => Arc::new(FirstLastMemory::new(*n)),
            MemoryParams::TokenWindow { max_tokens, reserve_output } => {
                Arc::new(TokenWindowMemory::new(*max_tokens, *reserve_output))
            }
            MemoryParams::Summarize {
                recent_chars,
                summarize_threshold_chars,
                summary_chars_min,
                summary_chars_max,
            } => Arc::new(SummarizeMemory::new(
                *recent_chars,
                *summarize_threshold_chars,
                *summary_chars_min,
                *summary_chars_max,
            )),
            MemoryParams::Vector { top_k, min_score } => match embedder {
                Some(e) => Arc::new(VectorMemory::new(e, *top_k, *min_score)),
                None => {
                    warn!("vector memory requested but no embedder configured; using last_n");
                    Arc::new(LastNMemory::new(*top_k))
                }
            },
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_last_n_reads_n() {
        let p = MemoryParams::parse("last_n", &json!({"n": 5}));
        assert_eq!(p, MemoryParams::LastN { n: 5 });
    }

    #[test]
    fn parse_defaults_when_params_empty() {
        assert_eq!(MemoryParams::parse("last_n", &json!({})), MemoryParams::LastN { n: 20 });
        assert_eq!(
            MemoryParams::parse("token_window", &json!({})),
            MemoryParams::TokenWindow { max_tokens: 100_000, reserve_output: 4096 }
        );
    }

    #[test]
    fn parse_unknown_strategy_falls_back_to_last_n() {
        let p = MemoryParams::parse("holographic", &json!({"n": 3}));
        assert_eq!(p, MemoryParams::LastN { n: 3 });
    }

    #[test]
    fn parse_vector_reads_threshold() {
        let p = MemoryParams::parse("vector", &json!({"top_k": 4, "min_score": 0.7}));
        match p {
            MemoryParams::Vector { top_k, min_score } => {
                assert_eq!(top_k, 4);
                assert!((min_score - 0.7).abs() < 1e-6);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn vector_without_embedder_degrades_to_last_n() {
        let s = MemoryParams::Vector { top_k: 5, min_score: 0.5 }.build_strategy(None);
        assert_eq!(s.name(), "last_n");
    }

    #[test]
    fn strategy_names_round_trip() {
        for (name, params) in [
            ("last_n", json!({})),
            ("first_last", json!({})),
            ("token_window", json!({})),
            ("summarize", json!({})),
        ] {
            let p = MemoryParams::parse(name, &params);
            assert_eq!(p.strategy_name(), name);
            assert_eq!(p.build_strategy(None).name(), name);
        }
    }

    #[test]
    fn tool_messages_are_not_context_visible() {
        assert!(!HistoryMessage::new("1", "tool", "x").is_context_visible());
        assert!(HistoryMessage::new("2", "user", "x").is_context_visible());
        assert!(HistoryMessage::new("3", "assistant", "x").is_context_visible());
    }
}
