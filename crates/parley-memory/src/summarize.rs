// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Rolling-summary memory: one LLM-maintained summary of the older
//! conversation plus the recent tail in full detail.
//!
//! Context shape: `[system prompt + summary] [recent messages] [user input]`.
//! The summary itself lives on the thread row and is updated out of band by
//! the summarization job; this strategy only renders it and decides when an
//! update is due.

use async_trait::async_trait;

use parley_model::ChatMessage;

use crate::{ContextInput, HistoryMessage, MemoryStrategy};

pub struct SummarizeMemory {
    recent_chars: usize,
    summarize_threshold_chars: usize,
    summary_chars_min: usize,
    summary_chars_max: usize,
}

impl SummarizeMemory {
    pub fn new(
        recent_chars: usize,
        summarize_threshold_chars: usize,
        summary_chars_min: usize,
        summary_chars_max: usize,
    ) -> Self {
        Self { recent_chars, summarize_threshold_chars, summary_chars_min, summary_chars_max }
    }

    /// Characters available for the summary once the fixed parts of the
    /// request are accounted for, clamped to the configured band.
    fn summary_budget(&self, max_tokens: usize, system_chars: usize, recent_chars: usize) -> usize {
        // 4 chars ≈ 1 token; reserve 4k tokens for the response.
        let fixed_tokens = (system_chars + recent_chars) / 4;
        let available_tokens = max_tokens.saturating_sub(fixed_tokens).saturating_sub(4000);
        let available_chars = available_tokens * 4;
        available_chars.clamp(self.summary_chars_min, self.summary_chars_max)
    }

    fn system_with_summary(&self, system: Option<&str>, summary: &str, budget: usize) -> String {
        let mut out = system.unwrap_or_default().to_string();
        let mut summary = summary.to_string();
        if summary.len() > budget {
            let mut end = budget.saturating_sub(3);
            while end > 0 && !summary.is_char_boundary(end) {
                end -= 1;
            }
            summary = format!("{}...", &summary[..end]);
        }
        out.push_str("\n\n## Conversation Summary\n");
        out.push_str(&summary);
        out
    }

    /// True once the unsummarized span warrants a background update.
    pub fn should_summarize(&self, unsummarized_chars: usize) -> bool {
        unsummarized_chars > self.summarize_threshold_chars
    }

    pub fn threshold_chars(&self) -> usize {
        self.summarize_threshold_chars
    }
}

#[async_trait]
impl MemoryStrategy for SummarizeMemory {
    fn name(&self) -> &str {
        "summarize"
    }

    async fn build(&self, input: ContextInput<'_>) -> Vec<ChatMessage> {
        // Recent tail: newest messages until the character budget runs out.
        let mut tail: Vec<&HistoryMessage> = Vec::new();
        let mut chars = 0usize;
        for m in input.messages.iter().rev().filter(|m| m.is_context_visible()) {
            if chars + m.content.len() > self.recent_chars && !tail.is_empty() {
                break;
            }
            chars += m.content.len();
            tail.push(m);
        }
        tail.reverse();

        let mut result = Vec::new();
        let summary = input.thread_summary.unwrap_or_default();
        if !summary.is_empty() {
            let budget = self.summary_budget(
                input.max_tokens.map(|m| m as usize).unwrap_or(128_000),
                input.system_prompt.map(|s| s.len()).unwrap_or(0),
                chars,
            );
            result.push(ChatMessage::system(self.system_with_summary(
                input.system_prompt,
                summary,
                budget,
            )));
        } else if let Some(sys) = input.system_prompt.filter(|s| !s.is_empty()) {
            result.push(ChatMessage::system(sys));
        }

        for m in tail {
            result.push(match m.role.as_str() {
                "assistant" => ChatMessage::assistant(&m.content),
                _ => ChatMessage::user(&m.content),
            });
        }
        result
    }
}

/// Helpers shared with the summarization job.
pub struct SummarizationHelper;

impl SummarizationHelper {
    /// Prompt for an incremental summary update.
    pub fn build_summarization_prompt(
        existing_summary: &str,
        new_messages: &[HistoryMessage],
        word_limit: usize,
    ) -> String {
        let mut conversation = String::new();
        for m in new_messages {
            conversation.push_str(&m.role.to_uppercase());
            conversation.push_str(": ");
            conversation.push_str(&m.content);
            conversation.push_str("\n\n");
        }

        if existing_summary.is_empty() {
            format!(
                "Summarize this conversation concisely.\n\
                 Keep it under {word_limit} words.\n\
                 Write in the same language as the conversation.\n\n\
                 Conversation:\n{conversation}\n\
                 Summary:"
            )
        } else {
            format!(
                "Update this conversation summary with new messages.\n\
                 Keep it under {word_limit} words - be concise.\n\
                 Write in the same language as the conversation.\n\n\
                 Previous summary:\n{existing_summary}\n\n\
                 New messages:\n{conversation}\n\
                 Updated summary:"
            )
        }
    }

    /// Total characters of messages after the watermark.
    ///
    /// With no watermark everything counts.  An unknown watermark id (e.g.
    /// the message was hard-deleted by an admin flow) also counts
    /// everything, which errs toward summarizing again — idempotent, just
    /// earlier than strictly needed.
    pub fn unsummarized_chars(messages: &[HistoryMessage], watermark: Option<&str>) -> usize {
        let Some(mark) = watermark else {
            return messages.iter().map(|m| m.content.len()).sum();
        };
        let mut past_mark = false;
        let mut total = 0usize;
        for m in messages {
            if past_mark {
                total += m.content.len();
            } else if m.id == mark {
                past_mark = true;
            }
        }
        if past_mark {
            total
        } else {
            messages.iter().map(|m| m.content.len()).sum()
        }
    }

    /// Word limit for the summary generation prompt, scaled to the model's
    /// context budget.
    pub fn summary_word_limit(max_context: usize, system_chars: usize) -> usize {
        let available = max_context.saturating_sub(system_chars / 4).saturating_sub(4000);
        (available / 8).clamp(100, 500)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, role: &str, content: &str) -> HistoryMessage {
        HistoryMessage::new(id, role, content)
    }

    fn strategy() -> SummarizeMemory {
        SummarizeMemory::new(8000, 16_000, 500, 8000)
    }

    fn input<'a>(
        messages: &'a [HistoryMessage],
        system: Option<&'a str>,
        summary: Option<&'a str>,
    ) -> ContextInput<'a> {
        ContextInput {
            messages,
            system_prompt: system,
            max_tokens: Some(128_000),
            thread_summary: summary,
        }
    }

    #[tokio::test]
    async fn summary_lands_in_system_message() {
        let history = vec![msg("1", "user", "recent question")];
        let built = strategy()
            .build(input(&history, Some("base prompt"), Some("they discussed refunds")))
            .await;
        assert_eq!(built[0].role, parley_model::Role::System);
        assert!(built[0].content.starts_with("base prompt"));
        assert!(built[0].content.contains("## Conversation Summary"));
        assert!(built[0].content.contains("they discussed refunds"));
        assert_eq!(built[1].content, "recent question");
    }

    #[tokio::test]
    async fn no_summary_keeps_plain_system() {
        let history = vec![msg("1", "user", "q")];
        let built = strategy().build(input(&history, Some("base"), None)).await;
        assert_eq!(built[0].content, "base");
    }

    #[tokio::test]
    async fn recent_tail_is_bounded_by_chars() {
        let history: Vec<HistoryMessage> = (0..100)
            .map(|i| msg(&i.to_string(), "user", &format!("{:0>200}", i)))
            .collect();
        let tight = SummarizeMemory::new(1000, 16_000, 500, 8000);
        let built = tight.build(input(&history, None, None)).await;
        // 200 chars each, 1000-char budget → at most 5 messages.
        assert!(built.len() <= 5, "kept {}", built.len());
        // And the newest one always survives.
        assert_eq!(built.last().unwrap().content, format!("{:0>200}", 99));
    }

    #[tokio::test]
    async fn oversized_summary_is_truncated_with_ellipsis() {
        let history = vec![msg("1", "user", "q")];
        let long_summary = "s".repeat(20_000);
        let built = strategy().build(input(&history, Some("base"), Some(&long_summary))).await;
        let sys = &built[0].content;
        assert!(sys.len() < 20_000);
        assert!(sys.contains("..."));
    }

    #[test]
    fn summary_budget_clamps_to_band() {
        let s = strategy();
        // Tiny context → clamp to min.
        assert_eq!(s.summary_budget(2000, 1000, 1000), 500);
        // Huge context → clamp to max.
        assert_eq!(s.summary_budget(1_000_000, 0, 0), 8000);
    }

    #[test]
    fn should_summarize_uses_threshold() {
        let s = strategy();
        assert!(!s.should_summarize(16_000));
        assert!(s.should_summarize(16_001));
    }

    // ── SummarizationHelper ───────────────────────────────────────────────────

    #[test]
    fn first_summary_prompt_has_no_previous_section() {
        let msgs = vec![msg("1", "user", "hello")];
        let p = SummarizationHelper::build_summarization_prompt("", &msgs, 200);
        assert!(p.contains("Summarize this conversation"));
        assert!(!p.contains("Previous summary"));
        assert!(p.contains("USER: hello"));
    }

    #[test]
    fn incremental_prompt_carries_previous_summary() {
        let msgs = vec![msg("1", "assistant", "sure")];
        let p = SummarizationHelper::build_summarization_prompt("old summary", &msgs, 200);
        assert!(p.contains("Previous summary:\nold summary"));
        assert!(p.contains("ASSISTANT: sure"));
        assert!(p.contains("under 200 words"));
    }

    #[test]
    fn unsummarized_chars_counts_after_watermark() {
        let msgs = vec![
            msg("a", "user", "12345"),
            msg("b", "assistant", "1234567890"),
            msg("c", "user", "123"),
        ];
        assert_eq!(SummarizationHelper::unsummarized_chars(&msgs, None), 18);
        assert_eq!(SummarizationHelper::unsummarized_chars(&msgs, Some("a")), 13);
        assert_eq!(SummarizationHelper::unsummarized_chars(&msgs, Some("b")), 3);
        assert_eq!(SummarizationHelper::unsummarized_chars(&msgs, Some("c")), 0);
    }

    #[test]
    fn unknown_watermark_counts_everything() {
        let msgs = vec![msg("a", "user", "12345")];
        assert_eq!(SummarizationHelper::unsummarized_chars(&msgs, Some("gone")), 5);
    }

    #[test]
    fn word_limit_is_clamped() {
        assert_eq!(SummarizationHelper::summary_word_limit(1000, 0), 100);
        assert_eq!(SummarizationHelper::summary_word_limit(1_000_000, 0), 500);
    }
}
