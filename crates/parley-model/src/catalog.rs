// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Model catalog: static metadata for known models — context limits,
//! per-million pricing, tiers, and degradation fallback chains.

use serde::{Deserialize, Serialize};

fn default_kind() -> String {
    "chat".to_string()
}

/// Metadata for a single model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelEntry {
    /// Model identifier as sent on the wire (e.g. "gpt-4o-mini")
    pub name: String,
    /// Provider identifier: "openai" | "anthropic" | "groq" | "ollama"
    pub provider: String,
    /// "chat" or "embedding"
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Total context window in tokens
    pub max_context: u32,
    /// Maximum output tokens per completion
    pub max_output: u32,
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
    /// 0 = embedding, 1 = fast, 2 = mid, 3 = premium
    pub tier: u8,
    /// Next cheaper model in the degradation chain
    #[serde(default)]
    pub fallback_to: Option<String>,
    /// Embedding dimensionality (embedding models only)
    #[serde(default)]
    pub dimensions: Option<u32>,
}

impl ModelEntry {
    pub fn is_free(&self) -> bool {
        self.input_cost_per_million == 0.0 && self.output_cost_per_million == 0.0
    }

    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_cost_per_million
            + (output_tokens as f64 / 1_000_000.0) * self.output_cost_per_million
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    models: Vec<ModelEntry>,
    #[serde(default)]
    provider_defaults: std::collections::HashMap<String, String>,
}

fn catalog_file() -> &'static CatalogFile {
    use std::sync::OnceLock;
    static CATALOG: OnceLock<CatalogFile> = OnceLock::new();
    CATALOG.get_or_init(|| {
        let yaml = include_str!("../models.yaml");
        serde_yaml::from_str(yaml).expect("bundled models.yaml must be valid")
    })
}

/// Return all entries from the bundled static catalog.
pub fn static_catalog() -> &'static [ModelEntry] {
    &catalog_file().models
}

/// Look up a model by name.  Returns `None` when unknown.
pub fn lookup(model: &str) -> Option<&'static ModelEntry> {
    static_catalog().iter().find(|e| e.name == model)
}

/// Default model for a provider id, if configured.
pub fn default_model(provider: &str) -> Option<&'static str> {
    catalog_file().provider_defaults.get(provider).map(|s| s.as_str())
}

/// Context window for a model, with fallback for unknown models.
pub fn max_context(model: &str, default: u32) -> u32 {
    lookup(model).map(|e| e.max_context).unwrap_or(default)
}

/// Max output tokens for a model, with fallback for unknown models.
pub fn max_output(model: &str, default: u32) -> u32 {
    lookup(model).map(|e| e.max_output).unwrap_or(default)
}

/// Model tier; unknown models are treated as fast/cheap (tier 1).
pub fn model_tier(model: &str) -> u8 {
    lookup(model).map(|e| e.tier).unwrap_or(1)
}

pub fn is_premium_model(model: &str) -> bool {
    model_tier(model) >= 3
}

/// Calculate the cost of a completion in USD.
///
/// Cascade names ("fast+premium") are a fallback path only — the cascading
/// provider normally pre-computes the exact figure and passes it through
/// `TokenUsage::cost`.  Here the tokens are split evenly across the parts
/// for a rough estimate.
pub fn calculate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    if model.contains('+') {
        let parts: Vec<&str> = model.split('+').collect();
        let n = parts.len() as u64;
        return parts
            .iter()
            .map(|m| {
                lookup(m)
                    .map(|e| e.calculate_cost(input_tokens / n, output_tokens / n))
                    .unwrap_or(0.0)
            })
            .sum();
    }
    lookup(model).map(|e| e.calculate_cost(input_tokens, output_tokens)).unwrap_or(0.0)
}

/// Degradation chain from a model down to its cheapest fallback.
///
/// Cycle-safe: a misconfigured catalog cannot loop forever.
pub fn fallback_chain(model: &str) -> Vec<String> {
    let mut chain = vec![model.to_string()];
    let mut seen = std::collections::HashSet::new();
    seen.insert(model.to_string());
    let mut current = lookup(model).and_then(|e| e.fallback_to.clone());
    while let Some(next) = current {
        if !seen.insert(next.clone()) {
            break;
        }
        current = lookup(&next).and_then(|e| e.fallback_to.clone());
        chain.push(next);
    }
    chain
}

/// Pick a cheaper model based on how much of the budget is spent.
///
/// `< 80%` → the original model, `80–95%` → first fallback, `≥ 95%` → the
/// cheapest model in the chain.
pub fn get_degraded_model(model: &str, budget_percent_used: f64) -> String {
    let chain = fallback_chain(model);
    if budget_percent_used < 0.8 {
        chain[0].clone()
    } else if budget_percent_used < 0.95 && chain.len() > 1 {
        chain[1].clone()
    } else {
        chain.last().cloned().unwrap_or_else(|| model.to_string())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
