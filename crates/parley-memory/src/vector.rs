// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use parley_model::{
    embeddings::{cosine_similarity, Embedder},
    ChatMessage,
};

use crate::{ContextInput, MemoryStrategy};

/// Retrieve the messages most semantically similar to the current input.
///
/// The last user message is embedded as the query; candidates are scored by
/// cosine similarity, filtered by `min_score`, and the top K returned in
/// chronological order.  When there is no user message to query with, the
/// newest K messages are used instead.
pub struct VectorMemory {
    embedder: Arc<dyn Embedder>,
    top_k: usize,
    min_score: f32,
}

impl VectorMemory {
    pub fn new(embedder: Arc<dyn Embedder>, top_k: usize, min_score: f32) -> Self {
        Self { embedder, top_k, min_score }
    }
}

#[async_trait]
impl MemoryStrategy for VectorMemory {
    fn name(&self) -> &str {
        "vector"
    }

    async fn build(&self, input: ContextInput<'_>) -> Vec<ChatMessage> {
        let mut result = Vec::new();
        if let Some(sys) = input.system_prompt.filter(|s| !s.is_empty()) {
            result.push(ChatMessage::system(sys));
        }

        let visible: Vec<(usize, &crate::HistoryMessage)> = input
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_context_visible())
            .collect();

        let query_idx = visible.iter().rev().find(|(_, m)| m.is_user()).map(|(i, _)| *i);

        let selected: Vec<&crate::HistoryMessage> = match query_idx {
            Some(qi) => {
                let query = &input.messages[qi].content;
                match self.rank(query, &visible, qi).await {
                    Ok(mut picked) => {
                        // Chronological order, and the query message itself
                        // always closes the window.
                        picked.sort_unstable();
                        picked.push(qi);
                        picked.iter().map(|&i| &input.messages[i]).collect()
                    }
                    Err(e) => {
                        warn!(error = %e, "embedding failed; falling back to recent messages");
                        Self::recent(&visible, self.top_k)
                    }
                }
            }
            None => Self::recent(&visible, self.top_k),
        };

        for m in selected {
            result.push(match m.role.as_str() {
                "assistant" => ChatMessage::assistant(&m.content),
                _ => ChatMessage::user(&m.content),
            });
        }
        result
    }
}

impl VectorMemory {
    async fn rank(
        &self,
        query: &str,
        visible: &[(usize, &crate::HistoryMessage)],
        query_idx: usize,
    ) -> Result<Vec<usize>, parley_model::ProviderError> {
        let query_vec = self.embedder.embed(query).await?;

        let candidates: Vec<&(usize, &crate::HistoryMessage)> =
            visible.iter().filter(|(i, _)| *i != query_idx).collect();
        let texts: Vec<String> = candidates.iter().map(|(_, m)| m.content.clone()).collect();
        let vectors = self.embedder.embed_many(&texts).await?;

        let mut scored: Vec<(f32, usize)> = candidates
            .iter()
            .zip(vectors.iter())
            .filter_map(|((i, _), v)| {
                let score = cosine_similarity(&query_vec, v);
                (score >= self.min_score).then_some((score, *i))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.top_k);
        Ok(scored.into_iter().map(|(_, i)| i).collect())
    }

    fn recent<'a>(
        visible: &[(usize, &'a crate::HistoryMessage)],
        k: usize,
    ) -> Vec<&'a crate::HistoryMessage> {
        visible.iter().rev().take(k).rev().map(|(_, m)| *m).collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
