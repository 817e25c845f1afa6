// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{
    catalog,
    error::ProviderError,
    types::{estimate_message_tokens, ChatMessage, ChatRequest, ProviderResponse},
};

/// A lazily produced sequence of content chunks.  Finite, not restartable.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// The provider contract every adapter implements.
///
/// Instances are cached and shared across requests, so implementations hold
/// no per-call mutable state and must be safe to call concurrently.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider identifier ("anthropic", "openai", "groq", …).
    fn name(&self) -> &str;

    /// Model name as reported in audit records.
    fn model(&self) -> &str;

    /// One-shot completion with normalized tool calls.
    async fn complete(&self, req: ChatRequest) -> Result<ProviderResponse, ProviderError>;

    /// Streaming completion.  Yields text chunks only; tool rounds are not
    /// supported over a stream.
    async fn stream(&self, req: ChatRequest) -> Result<ChunkStream, ProviderError>;

    /// Best-effort token estimate for a message slice.
    fn count_tokens(&self, messages: &[ChatMessage]) -> usize {
        estimate_message_tokens(messages).max(1)
    }

    /// Context window for the configured model, from the static catalog.
    fn max_context_tokens(&self) -> u32 {
        catalog::max_context(self.model(), 128_000)
    }
}
