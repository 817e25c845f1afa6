// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Shared application state wired once at startup and cloned into every
//! handler.  The former process-wide singletons of this design (job client,
//! cost trackers, lock manager) live here as explicit dependencies.

use std::sync::{Arc, Mutex as StdMutex};

use dashmap::DashMap;
use sqlx::SqlitePool;
use tracing::{info, warn};

use parley_config::Settings;
use parley_core::{AgentRuntime, CostTracker, LockManager, ModelSpec, ProviderFactory};
use parley_jobs::JobClient;
use parley_model::{
    build_agent_provider,
    embeddings::{Embedder, EmbeddingsClient},
    ChatProvider,
};
use parley_tools::{builtin::CalculatorTool, ToolRegistry};

/// Providers are expensive to build and safe to share; cache them per full
/// model identity.
pub struct CachedProviderFactory {
    settings: Arc<Settings>,
    cache: DashMap<ModelSpec, Arc<dyn ChatProvider>>,
}

impl CachedProviderFactory {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings, cache: DashMap::new() }
    }
}

impl ProviderFactory for CachedProviderFactory {
    fn provider_for(&self, spec: &ModelSpec) -> anyhow::Result<Arc<dyn ChatProvider>> {
        if let Some(cached) = self.cache.get(spec) {
            return Ok(Arc::clone(&cached));
        }
        let provider = build_agent_provider(
            &spec.provider,
            &spec.model,
            spec.premium_provider.as_deref(),
            spec.premium_model.as_deref(),
            &self.settings,
        )?;
        self.cache.insert(spec.clone(), Arc::clone(&provider));
        Ok(provider)
    }
}

#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub pool: SqlitePool,
    pub runtime: Arc<AgentRuntime>,
    pub providers: Arc<CachedProviderFactory>,
    pub locks: Arc<LockManager>,
    pub embedder: Option<Arc<dyn Embedder>>,
    /// Present only when Redis is configured; the async chat path returns
    /// 503 without it.
    pub jobs: Option<JobClient>,
    /// Per-conversation cost trackers, keyed by thread id.
    trackers: Arc<DashMap<String, Arc<StdMutex<CostTracker>>>>,
}

impl AppContext {
    pub async fn build(settings: Settings) -> anyhow::Result<Self> {
        let settings = Arc::new(settings);

        let pool = parley_store::db::connect(&settings.database.url()).await?;
        parley_store::db::init_schema(&pool).await?;

        // The default provider must be constructible, or the service is
        // misconfigured — fail at startup, not on the first request.
        let providers = Arc::new(CachedProviderFactory::new(Arc::clone(&settings)));
        providers
            .provider_for(&ModelSpec {
                provider: settings.default_provider.clone(),
                model: settings.default_model.clone(),
                premium_provider: None,
                premium_model: None,
            })
            .map_err(|e| anyhow::anyhow!("invalid default provider configuration: {e}"))?;

        let embedder: Option<Arc<dyn Embedder>> = settings.embedding_model.as_ref().map(|model| {
            Arc::new(EmbeddingsClient::new(
                model.clone(),
                settings.openai_api_key.clone(),
                None,
            )) as Arc<dyn Embedder>
        });
        if embedder.is_none() {
            info!("no embedding model configured; vector memory and document search disabled");
        }

        let mut tools = ToolRegistry::new();
        tools.register(CalculatorTool);

        let locks = Arc::new(LockManager::new());
        let runtime = Arc::new(AgentRuntime::new(
            pool.clone(),
            Arc::clone(&providers) as Arc<dyn ProviderFactory>,
            Arc::new(tools),
            Arc::clone(&locks),
            embedder.clone(),
        ));

        let jobs = match &settings.redis_url {
            Some(url) => match JobClient::connect(pool.clone(), url).await {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!(error = %e, "redis unavailable; async processing disabled");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            settings,
            pool,
            runtime,
            providers,
            locks,
            embedder,
            jobs,
            trackers: Arc::new(DashMap::new()),
        })
    }

    /// The cost tracker for a conversation, created with the configured
    /// budgets on first use.
    pub fn tracker_for(&self, thread_id: &str) -> Arc<StdMutex<CostTracker>> {
        Arc::clone(
            &self
                .trackers
                .entry(thread_id.to_string())
                .or_insert_with(|| {
                    Arc::new(StdMutex::new(CostTracker::with_budgets(
                        Some(self.settings.conversation_budget),
                        Some(self.settings.total_budget),
                    )))
                }),
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parley_config::Settings;

    fn test_settings() -> Settings {
        Settings {
            default_provider: "mock".into(),
            default_model: "mock-model".into(),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn build_wires_state_without_redis() {
        let ctx = AppContext::build(test_settings()).await.unwrap();
        assert!(ctx.jobs.is_none());
        assert!(ctx.embedder.is_none());
    }

    #[tokio::test]
    async fn invalid_default_provider_is_startup_fatal() {
        let settings = Settings {
            default_provider: "nonexistent".into(),
            ..test_settings()
        };
        let err = match AppContext::build(settings).await {
            Ok(_) => panic!("expected AppContext::build to fail"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("invalid default provider"));
    }

    #[tokio::test]
    async fn tracker_is_per_thread_and_sticky() {
        let ctx = AppContext::build(test_settings()).await.unwrap();
        let a1 = ctx.tracker_for("t-1");
        let a2 = ctx.tracker_for("t-1");
        let b = ctx.tracker_for("t-2");
        a1.lock().unwrap().add_usage("x", 0, 0, Some(0.25));
        assert!((a2.lock().unwrap().total_cost - 0.25).abs() < 1e-9);
        assert_eq!(b.lock().unwrap().total_cost, 0.0);
    }

    #[tokio::test]
    async fn provider_cache_returns_shared_instance() {
        let ctx = AppContext::build(test_settings()).await.unwrap();
        let spec = ModelSpec {
            provider: "mock".into(),
            model: "mock-model".into(),
            premium_provider: None,
            premium_model: None,
        };
        let a = ctx.providers.provider_for(&spec).unwrap();
        let b = ctx.providers.provider_for(&spec).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
