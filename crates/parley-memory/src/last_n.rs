// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;

use parley_model::ChatMessage;

use crate::{ContextInput, HistoryMessage, MemoryStrategy};

/// Keep the last N user→assistant exchanges.
///
/// N counts user-message boundaries, not raw messages: a single exchange can
/// span four or more records when tool calls intervene, and all of an
/// exchange's visible messages travel together.
pub struct LastNMemory {
    n: usize,
}

impl LastNMemory {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

/// Index of the first message belonging to the last `n` exchanges.
fn exchange_start(messages: &[HistoryMessage], n: usize) -> usize {
    let mut user_count = 0usize;
    let mut start = messages.len();
    for (i, m) in messages.iter().enumerate().rev() {
        if m.is_user() {
            user_count += 1;
            if user_count > n {
                break;
            }
            start = i;
        }
    }
    start
}

fn render(messages: &[HistoryMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter(|m| m.is_context_visible())
        .map(|m| match m.role.as_str() {
            "assistant" => ChatMessage::assistant(&m.content),
            _ => ChatMessage::user(&m.content),
        })
        .collect()
}

#[async_trait]
impl MemoryStrategy for LastNMemory {
    fn name(&self) -> &str {
        "last_n"
    }

    async fn build(&self, input: ContextInput<'_>) -> Vec<ChatMessage> {
        let mut result = Vec::new();
        if let Some(sys) = input.system_prompt.filter(|s| !s.is_empty()) {
            result.push(ChatMessage::system(sys));
        }
        let start = exchange_start(input.messages, self.n);
        result.extend(render(&input.messages[start..]));
        result
    }
}

/// Keep the first message (conversation framing) plus the last N−1 exchanges.
pub struct FirstLastMemory {
    n: usize,
}

impl FirstLastMemory {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

#[async_trait]
impl MemoryStrategy for FirstLastMemory {
    fn name(&self) -> &str {
        "first_last"
    }

    async fn build(&self, input: ContextInput<'_>) -> Vec<ChatMessage> {
        let mut result = Vec::new();
        if let Some(sys) = input.system_prompt.filter(|s| !s.is_empty()) {
            result.push(ChatMessage::system(sys));
        }
        let tail_n = self.n.saturating_sub(1);
        let start = exchange_start(input.messages, tail_n);
        if start > 0 {
            if let Some(first) = input.messages.iter().find(|m| m.is_context_visible()) {
                result.extend(render(std::slice::from_ref(first)));
            }
        }
        result.extend(render(&input.messages[start..]));
        result
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
