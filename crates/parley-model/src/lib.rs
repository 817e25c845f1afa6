// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod catalog;
pub mod embeddings;
pub mod parse;
pub mod sanitize;
mod anthropic;
mod cascading;
mod error;
mod mock;
mod openai_compat;
mod provider;
mod types;

pub use anthropic::AnthropicProvider;
pub use cascading::{CascadingProvider, DEFAULT_TRIGGER, ESCALATION_INSTRUCTIONS, TRANSITION_TEXT};
pub use error::ProviderError;
pub use mock::{MockProvider, ScriptedMockProvider};
pub use openai_compat::{AuthStyle, OpenAiCompatProvider};
pub use provider::{ChatProvider, ChunkStream};
pub use types::*;

use std::sync::Arc;

use anyhow::bail;
use parley_config::Settings;

/// Construct a provider from a provider id + model name.
///
/// API keys are resolved from [`Settings`]; base URLs only matter for local
/// endpoints (ollama).  Unknown ids are a configuration error — this is
/// checked at agent-create time and again (startup-fatal) at bootstrap for
/// the default provider.
pub fn build_provider(
    provider: &str,
    model: &str,
    settings: &Settings,
) -> anyhow::Result<Arc<dyn ChatProvider>> {
    let key = settings.api_key_for(provider);
    match provider {
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(model.to_string(), key, None))),
        "openai" => Ok(Arc::new(OpenAiCompatProvider::openai(model.to_string(), key, None))),
        "groq" => Ok(Arc::new(OpenAiCompatProvider::groq(model.to_string(), key, None))),
        "ollama" => Ok(Arc::new(OpenAiCompatProvider::ollama(
            model.to_string(),
            &settings.ollama_base_url,
        ))),
        "mock" => Ok(Arc::new(MockProvider)),
        other => bail!(
            "unknown model provider: {other:?} (known: anthropic, openai, groq, ollama, mock)"
        ),
    }
}

/// Construct a provider for an agent, wrapping fast + premium in a
/// [`CascadingProvider`] when a premium side is configured.
pub fn build_agent_provider(
    provider: &str,
    model: &str,
    premium_provider: Option<&str>,
    premium_model: Option<&str>,
    settings: &Settings,
) -> anyhow::Result<Arc<dyn ChatProvider>> {
    let fast = build_provider(provider, model, settings)?;
    match (premium_provider, premium_model) {
        (Some(pp), Some(pm)) if !pp.is_empty() && !pm.is_empty() => {
            let premium = build_provider(pp, pm, settings)?;
            Ok(Arc::new(CascadingProvider::new(fast, premium)))
        }
        _ => Ok(fast),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            openai_api_key: Some("sk-test".into()),
            anthropic_api_key: Some("sk-test".into()),
            groq_api_key: Some("gsk-test".into()),
            ..Settings::default()
        }
    }

    #[test]
    fn build_known_providers() {
        let s = settings();
        for (p, m) in [
            ("anthropic", "claude-sonnet-4-20250514"),
            ("openai", "gpt-4o-mini"),
            ("groq", "llama-3.3-70b-versatile"),
            ("ollama", "llama3.2"),
            ("mock", "mock-model"),
        ] {
            let provider = build_provider(p, m, &s).unwrap();
            assert_eq!(provider.name(), p);
        }
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let err = match build_provider("totally-unknown", "m", &settings()) {
            Ok(_) => panic!("expected build_provider to fail"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("unknown model provider"));
    }

    #[test]
    fn agent_provider_without_premium_is_plain() {
        let p = build_agent_provider("mock", "mock-model", None, None, &settings()).unwrap();
        assert_eq!(p.name(), "mock");
    }

    #[test]
    fn agent_provider_with_premium_is_cascading() {
        let p = build_agent_provider(
            "openai",
            "gpt-4o-mini",
            Some("anthropic"),
            Some("claude-opus-4-20250514"),
            &settings(),
        )
        .unwrap();
        assert_eq!(p.name(), "cascading");
        assert_eq!(p.model(), "gpt-4o-mini");
    }

    #[test]
    fn agent_provider_with_empty_premium_is_plain() {
        let p =
            build_agent_provider("mock", "mock-model", Some(""), Some(""), &settings()).unwrap();
        assert_eq!(p.name(), "mock");
    }
}
