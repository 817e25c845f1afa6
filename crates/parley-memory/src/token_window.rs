// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;

use parley_model::{estimate_tokens, ChatMessage};

use crate::{ContextInput, MemoryStrategy};

type CounterFn = Box<dyn Fn(&str) -> usize + Send + Sync>;

/// Fit as many recent messages as possible inside a token budget.
///
/// Budget = `max_tokens − reserve_output`.  Messages are selected newest to
/// oldest until the budget is exhausted, then reversed back to
/// chronological order.  The token counter is injected so a provider with
/// an exact tokenizer can replace the heuristic.
pub struct TokenWindowMemory {
    max_tokens: usize,
    reserve_output: usize,
    count: CounterFn,
}

impl TokenWindowMemory {
    pub fn new(max_tokens: usize, reserve_output: usize) -> Self {
        Self { max_tokens, reserve_output, count: Box::new(|s| estimate_tokens(s)) }
    }

    pub fn with_counter(
        mut self,
        count: impl Fn(&str) -> usize + Send + Sync + 'static,
    ) -> Self {
        self.count = Box::new(count);
        self
    }
}

#[async_trait]
impl MemoryStrategy for TokenWindowMemory {
    fn name(&self) -> &str {
        "token_window"
    }

    async fn build(&self, input: ContextInput<'_>) -> Vec<ChatMessage> {
        let limit = input.max_tokens.map(|m| m as usize).unwrap_or(self.max_tokens);
        let budget = limit.saturating_sub(self.reserve_output);

        let mut result = Vec::new();
        let mut used = 0usize;

        if let Some(sys) = input.system_prompt.filter(|s| !s.is_empty()) {
            let sys_tokens = (self.count)(sys);
            if sys_tokens < budget {
                result.push(ChatMessage::system(sys));
                used += sys_tokens;
            }
        }

        let mut selected: Vec<ChatMessage> = Vec::new();
        for m in input.messages.iter().rev().filter(|m| m.is_context_visible()) {
            let tokens = (self.count)(&m.content);
            if used + tokens > budget {
                break;
            }
            used += tokens;
            selected.push(match m.role.as_str() {
                "assistant" => ChatMessage::assistant(&m.content),
                _ => ChatMessage::user(&m.content),
            });
        }
        selected.reverse();
        result.extend(selected);
        result
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HistoryMessage;

    fn msg(id: usize, role: &str, content: &str) -> HistoryMessage {
        HistoryMessage::new(id.to_string(), role, content)
    }

    fn input<'a>(
        messages: &'a [HistoryMessage],
        system: Option<&'a str>,
        max_tokens: Option<u32>,
    ) -> ContextInput<'a> {
        ContextInput { messages, system_prompt: system, max_tokens, thread_summary: None }
    }

    /// Counter: one token per character, for exact arithmetic in tests.
    fn per_char(s: &str) -> usize {
        s.chars().count()
    }

    #[tokio::test]
    async fn budget_bounds_selection() {
        let history = vec![
            msg(0, "user", "aaaaaaaaaa"),      // 10 tokens
            msg(1, "assistant", "bbbbbbbbbb"), // 10 tokens
            msg(2, "user", "cccccccccc"),      // 10 tokens
        ];
        // budget = 25 - 0 = 25 → newest two fit, oldest does not.
        let memory = TokenWindowMemory::new(25, 0).with_counter(per_char);
        let built = memory.build(input(&history, None, None)).await;
        assert_eq!(built.len(), 2);
        assert_eq!(built[0].content, "bbbbbbbbbb");
        assert_eq!(built[1].content, "cccccccccc");
    }

    #[tokio::test]
    async fn output_is_chronological() {
        let history = vec![
            msg(0, "user", "first"),
            msg(1, "assistant", "second"),
            msg(2, "user", "third"),
        ];
        let memory = TokenWindowMemory::new(1000, 0).with_counter(per_char);
        let built = memory.build(input(&history, None, None)).await;
        let contents: Vec<&str> = built.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn reserve_output_shrinks_budget() {
        let history = vec![msg(0, "user", "aaaaaaaaaa")]; // 10 tokens
        let fits = TokenWindowMemory::new(15, 0).with_counter(per_char);
        assert_eq!(fits.build(input(&history, None, None)).await.len(), 1);
        let too_tight = TokenWindowMemory::new(15, 10).with_counter(per_char);
        assert!(too_tight.build(input(&history, None, None)).await.is_empty());
    }

    #[tokio::test]
    async fn request_max_tokens_overrides_config() {
        let history = vec![msg(0, "user", "aaaaaaaaaa")];
        let memory = TokenWindowMemory::new(5, 0).with_counter(per_char);
        // Config budget (5) would reject, request budget (100) accepts.
        let built = memory.build(input(&history, None, Some(100))).await;
        assert_eq!(built.len(), 1);
    }

    #[tokio::test]
    async fn system_prompt_counts_against_budget() {
        let history = vec![msg(0, "user", "aaaaaaaaaa")]; // 10
        let memory = TokenWindowMemory::new(15, 0).with_counter(per_char);
        // system (8) + message (10) > 15 → message dropped, system kept.
        let built = memory.build(input(&history, Some("sysysysy"), None)).await;
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].role, parley_model::Role::System);
    }

    #[tokio::test]
    async fn oversized_system_prompt_is_skipped() {
        let sys = "s".repeat(100);
        let history = vec![msg(0, "user", "hi")];
        let memory = TokenWindowMemory::new(10, 0).with_counter(per_char);
        let built = memory.build(input(&history, Some(&sys), None)).await;
        assert!(built.iter().all(|m| m.role != parley_model::Role::System));
    }

    #[tokio::test]
    async fn default_counter_is_heuristic() {
        let history = vec![msg(0, "user", "a modest message for the heuristic")];
        let memory = TokenWindowMemory::new(100_000, 4096);
        let built = memory.build(input(&history, None, None)).await;
        assert_eq!(built.len(), 1);
    }

    #[tokio::test]
    async fn total_tokens_stay_under_budget() {
        // Property from the spec: Σ tokens(built) ≤ max_tokens − reserve.
        let history: Vec<HistoryMessage> =
            (0..50).map(|i| msg(i, "user", &format!("message number {i} with padding"))).collect();
        let memory = TokenWindowMemory::new(120, 20).with_counter(per_char);
        let built = memory.build(input(&history, None, None)).await;
        let total: usize = built.iter().map(|m| per_char(&m.content)).sum();
        assert!(total <= 100, "total {total} exceeds budget");
    }
}
