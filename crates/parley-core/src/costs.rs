// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use thiserror::Error;

use parley_model::catalog;

#[derive(Debug, Clone, Error)]
#[error("Budget exceeded: conversation=${conversation_cost:.4}, total=${total_cost:.4}")]
pub struct BudgetExceededError {
    pub conversation_cost: f64,
    pub total_cost: f64,
}

/// Per-conversation and total spend tracking with budget enforcement.
///
/// One tracker per conversation; the total-level counters are monotone
/// non-decreasing for the tracker's lifetime, `reset_conversation` only
/// zeroes the conversation-scoped ones.
#[derive(Debug, Clone)]
pub struct CostTracker {
    pub conversation_cost: f64,
    pub total_cost: f64,
    pub conversation_input_tokens: u64,
    pub conversation_output_tokens: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub request_count: u64,
    pub max_conversation_cost: Option<f64>,
    pub max_total_cost: Option<f64>,
    pub conversation_start: DateTime<Utc>,
}

impl Default for CostTracker {
    fn default() -> Self {
        Self {
            conversation_cost: 0.0,
            total_cost: 0.0,
            conversation_input_tokens: 0,
            conversation_output_tokens: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            request_count: 0,
            max_conversation_cost: None,
            max_total_cost: None,
            conversation_start: Utc::now(),
        }
    }
}

impl CostTracker {
    pub fn with_budgets(max_conversation: Option<f64>, max_total: Option<f64>) -> Self {
        Self {
            max_conversation_cost: max_conversation,
            max_total_cost: max_total,
            ..Self::default()
        }
    }

    /// Record one completion's usage and return its cost.
    ///
    /// `cost` carries a pre-computed figure when available (the cascading
    /// provider's aggregate); otherwise the catalog price for `model`
    /// applies.
    pub fn add_usage(
        &mut self,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost: Option<f64>,
    ) -> f64 {
        let cost = cost.unwrap_or_else(|| catalog::calculate_cost(model, input_tokens, output_tokens));
        self.conversation_cost += cost;
        self.total_cost += cost;
        self.conversation_input_tokens += input_tokens;
        self.conversation_output_tokens += output_tokens;
        self.total_input_tokens += input_tokens;
        self.total_output_tokens += output_tokens;
        self.request_count += 1;
        cost
    }

    /// Fraction of the conversation budget spent (0.0 when unlimited).
    pub fn budget_percent_used(&self) -> f64 {
        match self.max_conversation_cost {
            Some(max) if max > 0.0 => self.conversation_cost / max,
            _ => 0.0,
        }
    }

    pub fn is_over_budget(&self) -> bool {
        if let Some(max) = self.max_conversation_cost {
            if self.conversation_cost >= max {
                return true;
            }
        }
        if let Some(max) = self.max_total_cost {
            if self.total_cost >= max {
                return true;
            }
        }
        false
    }

    pub fn check_budget(&self) -> Result<(), BudgetExceededError> {
        if self.is_over_budget() {
            return Err(BudgetExceededError {
                conversation_cost: self.conversation_cost,
                total_cost: self.total_cost,
            });
        }
        Ok(())
    }

    /// Zero the conversation-scoped counters.  Total counters persist.
    pub fn reset_conversation(&mut self) {
        self.conversation_cost = 0.0;
        self.conversation_input_tokens = 0;
        self.conversation_output_tokens = 0;
        self.conversation_start = Utc::now();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
