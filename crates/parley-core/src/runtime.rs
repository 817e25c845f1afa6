// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The chat state machine: authorize → lock → persist → context → model →
//! tools → persist → stream.
//!
//! One call here is one user turn.  All message appends for the turn happen
//! under the per-thread lock, so concurrent requests against the same
//! thread serialize into a clean `user → (assistant+calls → results)* →
//! assistant` log.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_memory::{ContextInput, HistoryMessage, MemoryParams, SummarizationHelper};
use parley_model::{
    catalog, embeddings::Embedder, ChatMessage, ChatProvider, ChatRequest, ProviderError,
    ProviderResponse, ToolSpec,
};
use parley_store::{
    Agent, AgentStore, CurrentUser, Message, MessageStore, NewMessage, StoreError, Thread,
    ThreadStore,
};
use parley_tools::{
    builtin::{SearchDocumentsTool, UpdateContextTool},
    execute_tool_calls, CapabilityEnforcer, ToolCall, ToolRegistry,
};

use crate::{
    context::{render_system_prompt, ScopedDocumentSearcher, UserContextProvider, UserContextSink},
    costs::{BudgetExceededError, CostTracker},
    locks::{LockManager, NS_THREAD},
};

/// Canned reply when the tool loop hits its round budget.
const MAX_ROUNDS_APOLOGY: &str =
    "I apologize, but I wasn't able to complete the task within the allowed number of steps.";

const DEFAULT_MAX_TOOL_ROUNDS: u32 = 10;
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Which surface produced a turn; recorded in message metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    Chat,
    ChatStream,
    ChatWs,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Chat => "chat",
            CallType::ChatStream => "chat_stream",
            CallType::ChatWs => "chat_ws",
        }
    }
}

/// Per-request overrides on top of the agent's stored configuration.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub memory_strategy: Option<String>,
    pub memory_n: Option<u64>,
    pub stick_to_facts: bool,
    pub objective_responses: bool,
    pub call_type: CallType,
    /// The async path persists the user message before enqueueing (so
    /// clients polling the thread see it immediately); the worker sets this
    /// to avoid writing it twice.
    pub user_message_persisted: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: None,
            memory_strategy: None,
            memory_n: None,
            stick_to_facts: false,
            objective_responses: false,
            call_type: CallType::Chat,
            user_message_persisted: false,
        }
    }
}

/// The assembled result of one turn.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// The persisted final assistant message.
    pub message: Message,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub duration_ms: i64,
    pub tools_used: Vec<String>,
    pub model: String,
    pub provider: String,
    /// The rolling-summary threshold tripped; the caller should enqueue a
    /// summarization job.
    pub needs_summarization: bool,
    pub user_context: Option<Value>,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("thread not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Budget(#[from] BudgetExceededError),

    /// The per-thread lock could not be acquired in time.
    #[error("thread busy")]
    Busy,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Internal(String),
}

impl From<anyhow::Error> for ChatError {
    fn from(e: anyhow::Error) -> Self {
        ChatError::Internal(e.to_string())
    }
}

/// The full model identity of an agent, including the premium side of a
/// cascade.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelSpec {
    pub provider: String,
    pub model: String,
    pub premium_provider: Option<String>,
    pub premium_model: Option<String>,
}

impl ModelSpec {
    fn for_agent(agent: &Agent, model_override: &str) -> Self {
        Self {
            provider: agent.provider.clone(),
            model: model_override.to_string(),
            premium_provider: agent.premium_provider.clone(),
            premium_model: agent.premium_model.clone(),
        }
    }
}

/// Hands out (cached, shared) provider instances.  The gateway implements
/// this over the settings; tests substitute a fixed provider.
pub trait ProviderFactory: Send + Sync {
    fn provider_for(&self, spec: &ModelSpec) -> anyhow::Result<Arc<dyn ChatProvider>>;
}

pub struct AgentRuntime {
    pool: SqlitePool,
    providers: Arc<dyn ProviderFactory>,
    tools: Arc<ToolRegistry>,
    locks: Arc<LockManager>,
    embedder: Option<Arc<dyn Embedder>>,
    max_tool_rounds: u32,
    lock_timeout: Duration,
}

impl AgentRuntime {
    pub fn new(
        pool: SqlitePool,
        providers: Arc<dyn ProviderFactory>,
        tools: Arc<ToolRegistry>,
        locks: Arc<LockManager>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self {
            pool,
            providers,
            tools,
            locks,
            embedder,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn context_provider(&self) -> UserContextProvider {
        UserContextProvider::new(self.pool.clone(), Arc::clone(&self.locks))
    }

    /// Process one user message and return the final assistant reply.
    pub async fn chat(
        &self,
        thread_id: &str,
        user: &CurrentUser,
        message: &str,
        options: ChatOptions,
        tracker: Arc<StdMutex<CostTracker>>,
    ) -> Result<ChatOutcome, ChatError> {
        let started = Instant::now();
        let turn = self.prepare(thread_id, user, &options, &tracker).await?;

        // Everything from here runs under the thread lock: message appends
        // for this turn are linearized against concurrent requests.
        let _guard = self
            .locks
            .acquire(NS_THREAD, thread_id, Some(self.lock_timeout))
            .await
            .map_err(|_| ChatError::Busy)?;

        let messages = MessageStore::new(&self.pool);
        if !options.user_message_persisted {
            messages.append(NewMessage::text(thread_id, "user", message)).await?;
        }

        // History now ends with the user message; the memory strategy keeps
        // it inside the window it builds.
        let mut context = self.build_context(&turn, message).await?;
        if !context.last().map(|m| m.role == parley_model::Role::User).unwrap_or(false) {
            context.push(ChatMessage::user(message));
        }

        // ── Completion loop ──────────────────────────────────────────────────
        let mut tools_used: Vec<String> = Vec::new();
        let mut total_input = 0u64;
        let mut total_output = 0u64;
        let mut total_cost = 0.0f64;
        let mut final_response: Option<ProviderResponse> = None;

        for round in 0..self.max_tool_rounds {
            let response = self.call_model(&turn, &context, &tracker).await?;
            total_input += response.usage.input;
            total_output += response.usage.output;
            total_cost += {
                let mut t = tracker.lock().expect("tracker poisoned");
                let cost = t.add_usage(
                    &response.model,
                    response.usage.input,
                    response.usage.output,
                    response.usage.cost,
                );
                t.check_budget()?;
                cost
            };

            if !response.has_tool_calls() {
                final_response = Some(response);
                break;
            }

            debug!(round, count = response.tool_calls.len(), "executing tool calls");

            // Audit record of the request, then the results, in order.
            messages
                .append(
                    NewMessage::text(thread_id, "assistant", &response.content).with_tool_calls(
                        serde_json::to_value(&response.tool_calls).unwrap_or(Value::Null),
                    ),
                )
                .await?;

            let calls: Vec<ToolCall> = response
                .tool_calls
                .iter()
                .map(|tc| ToolCall::new(&tc.id, &tc.name, tc.arguments.clone()))
                .collect();
            for tc in &response.tool_calls {
                if !tools_used.contains(&tc.name) {
                    tools_used.push(tc.name.clone());
                }
            }

            let results = execute_tool_calls(&turn.registry, &turn.enforcer, &calls).await;
            for result in &results {
                let mut msg = NewMessage::text(thread_id, "tool", result.content())
                    .as_tool_result(&result.tool_call_id);
                msg.metadata = json!({ "is_error": result.is_error() });
                messages.append(msg).await?;
            }

            // Extend the in-flight context so the next round sees this
            // exchange in full canonical form.
            context.push(ChatMessage::assistant_with_tools(
                &response.content,
                response.tool_calls.clone(),
            ));
            for result in &results {
                context.push(ChatMessage::tool_result(&result.tool_call_id, result.content()));
            }
        }

        // Max-rounds exhaustion: keep every tool message already written
        // and reply with the canned apology instead of raising.
        let response = final_response.unwrap_or_else(|| {
            warn!(thread_id, rounds = self.max_tool_rounds, "tool loop budget exhausted");
            ProviderResponse {
                content: MAX_ROUNDS_APOLOGY.to_string(),
                usage: Default::default(),
                model: turn.effective_model.clone(),
                provider: turn.agent.provider.clone(),
                tool_calls: vec![],
                finish_reason: Some("max_tool_rounds".into()),
                raw: Value::Null,
            }
        });

        let duration_ms = started.elapsed().as_millis() as i64;
        let outcome = self
            .finish_turn(
                &turn,
                &response,
                total_input,
                total_output,
                total_cost,
                duration_ms,
                tools_used,
                &options,
            )
            .await?;

        info!(
            thread_id,
            model = %outcome.model,
            cost = outcome.cost,
            duration_ms,
            tools = outcome.tools_used.len(),
            "chat turn complete"
        );
        Ok(outcome)
    }

    /// Streaming variant: tokens are sent through `chunks` as they arrive.
    ///
    /// Tool rounds are not supported over a stream — the request carries no
    /// tool schemas.  A dropped receiver (client disconnect) stops the
    /// stream at the next chunk boundary; whatever was produced is still
    /// persisted.
    pub async fn chat_stream(
        &self,
        thread_id: &str,
        user: &CurrentUser,
        message: &str,
        options: ChatOptions,
        tracker: Arc<StdMutex<CostTracker>>,
        chunks: mpsc::Sender<String>,
    ) -> Result<ChatOutcome, ChatError> {
        let started = Instant::now();
        let turn = self.prepare(thread_id, user, &options, &tracker).await?;

        let _guard = self
            .locks
            .acquire(NS_THREAD, thread_id, Some(self.lock_timeout))
            .await
            .map_err(|_| ChatError::Busy)?;

        let messages = MessageStore::new(&self.pool);
        if !options.user_message_persisted {
            messages.append(NewMessage::text(thread_id, "user", message)).await?;
        }

        let mut context = self.build_context(&turn, message).await?;
        if !context.last().map(|m| m.role == parley_model::Role::User).unwrap_or(false) {
            context.push(ChatMessage::user(message));
        }

        let provider = self.provider_for_turn(&turn, &tracker)?;
        let request = ChatRequest {
            messages: context,
            system: Some(turn.system_prompt.clone()),
            temperature: turn.temperature,
            max_tokens: turn.agent.max_tokens.max(1) as u32,
            tools: vec![],
        };
        let input_estimate = provider.count_tokens(&request.messages) as u64;

        let mut stream = provider.stream(request).await?;
        let mut content = String::new();
        use futures::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            content.push_str(&chunk);
            if chunks.send(chunk).await.is_err() {
                // Subscriber went away; stop streaming but keep what we have.
                debug!(thread_id, "stream consumer dropped; truncating turn");
                break;
            }
        }

        // Streams carry no usage frames; estimate for audit and budgets.
        let output_estimate = parley_model::estimate_tokens(&content) as u64;
        let cost = {
            let mut t = tracker.lock().expect("tracker poisoned");
            let cost =
                t.add_usage(&turn.effective_model, input_estimate, output_estimate, None);
            t.check_budget()?;
            cost
        };

        let response = ProviderResponse {
            content,
            usage: parley_model::TokenUsage {
                input: input_estimate,
                output: output_estimate,
                cost: Some(cost),
            },
            model: turn.effective_model.clone(),
            provider: turn.agent.provider.clone(),
            tool_calls: vec![],
            finish_reason: Some("stop".into()),
            raw: Value::Null,
        };
        let duration_ms = started.elapsed().as_millis() as i64;
        self.finish_turn(
            &turn,
            &response,
            input_estimate,
            output_estimate,
            cost,
            duration_ms,
            vec![],
            &options,
        )
        .await
    }

    // ── Internals ────────────────────────────────────────────────────────────

    async fn prepare(
        &self,
        thread_id: &str,
        user: &CurrentUser,
        options: &ChatOptions,
        tracker: &StdMutex<CostTracker>,
    ) -> Result<TurnSetup, ChatError> {
        // Authorize & load.  Out-of-scope and absent are the same NotFound.
        let thread = ThreadStore::new(&self.pool)
            .get(thread_id, user)
            .await?
            .ok_or_else(|| ChatError::NotFound(thread_id.to_string()))?;
        let agent = AgentStore::new(&self.pool)
            .get_unscoped(&thread.agent_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("agent {}", thread.agent_id)))?;

        // Budget gate BEFORE any side effect: a broke conversation persists
        // nothing and never reaches a provider.
        tracker.lock().expect("tracker poisoned").check_budget()?;

        let user_context = self.context_provider().load(&user.id).await.ok().flatten();

        // Per-request tool registry: the shared base plus user-bound
        // builtins, filtered down to what the agent declares and its
        // capabilities allow.
        let mut registry = (*self.tools).clone();
        registry.register(UpdateContextTool::new(Arc::new(UserContextSink::new(
            self.context_provider(),
            user.id.clone(),
        ))));
        if let Some(embedder) = &self.embedder {
            registry.register(SearchDocumentsTool::new(Arc::new(ScopedDocumentSearcher::new(
                self.pool.clone(),
                user.clone(),
                Arc::clone(embedder),
            ))));
        }
        let registry = Arc::new(registry);
        let enforcer = CapabilityEnforcer::new(
            agent.capabilities.iter().cloned(),
            registry.required_capabilities(),
        );
        let allowed: Vec<String> =
            enforcer.filter_allowed(&agent.tools).into_iter().map(|s| s.to_string()).collect();
        if allowed.len() < agent.tools.len() {
            info!(
                agent = %agent.id,
                "filtered {} tool(s) the agent lacks capabilities for",
                agent.tools.len() - allowed.len()
            );
        }
        let allowed_refs: Vec<&str> = allowed.iter().map(|s| s.as_str()).collect();
        let tool_specs: Vec<ToolSpec> = registry
            .schemas_for(&allowed_refs)
            .into_iter()
            .map(|s| ToolSpec { name: s.name, description: s.description, parameters: s.parameters })
            .collect();

        let system_prompt = render_system_prompt(
            &agent.system_prompt,
            user_context.as_ref(),
            agent.context_schema.as_ref(),
            &[],
            options.stick_to_facts,
            options.objective_responses,
        );

        let memory = self.memory_params(&agent, options);
        let effective_model = catalog::get_degraded_model(
            &agent.model,
            tracker.lock().expect("tracker poisoned").budget_percent_used(),
        );
        if effective_model != agent.model {
            info!(
                base = %agent.model,
                degraded = %effective_model,
                "budget pressure: degrading model for this call"
            );
        }

        let temperature =
            options.temperature.unwrap_or(agent.temperature as f32).clamp(0.0, 2.0);

        Ok(TurnSetup {
            thread,
            agent,
            user_context,
            registry,
            enforcer,
            tool_specs,
            system_prompt,
            memory,
            effective_model,
            temperature,
        })
    }

    fn memory_params(&self, agent: &Agent, options: &ChatOptions) -> MemoryParams {
        let strategy =
            options.memory_strategy.as_deref().unwrap_or(agent.memory_strategy.as_str());
        let mut params = agent.memory_params.clone();
        if let (Some(n), Value::Object(map)) = (options.memory_n, &mut params) {
            map.insert("n".into(), json!(n));
        }
        MemoryParams::parse(strategy, &params)
    }

    async fn build_context(
        &self,
        turn: &TurnSetup,
        _incoming: &str,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let history: Vec<HistoryMessage> = MessageStore::new(&self.pool)
            .list(&turn.thread.id, 1000)
            .await?
            .into_iter()
            .map(|m| HistoryMessage::new(m.id, m.role, m.content))
            .collect();

        let strategy = turn.memory.build_strategy(self.embedder.clone());
        let spec = self.providers.provider_for(&ModelSpec::for_agent(
            &turn.agent,
            &turn.effective_model,
        ))?;
        let built = strategy
            .build(ContextInput {
                messages: &history,
                // The runtime sends the system prompt separately on the
                // request; strategies only shape the message window here.
                system_prompt: None,
                max_tokens: Some(spec.max_context_tokens()),
                thread_summary: turn.thread.summary.as_deref(),
            })
            .await;
        Ok(built)
    }

    fn provider_for_turn(
        &self,
        turn: &TurnSetup,
        _tracker: &StdMutex<CostTracker>,
    ) -> Result<Arc<dyn ChatProvider>, ChatError> {
        Ok(self
            .providers
            .provider_for(&ModelSpec::for_agent(&turn.agent, &turn.effective_model))?)
    }

    async fn call_model(
        &self,
        turn: &TurnSetup,
        context: &[ChatMessage],
        tracker: &StdMutex<CostTracker>,
    ) -> Result<ProviderResponse, ChatError> {
        let provider = self.provider_for_turn(turn, tracker)?;
        let request = ChatRequest {
            messages: context.to_vec(),
            system: Some(turn.system_prompt.clone()),
            temperature: turn.temperature,
            max_tokens: turn.agent.max_tokens.max(1) as u32,
            tools: turn.tool_specs.clone(),
        };
        Ok(provider.complete(request).await?)
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_turn(
        &self,
        turn: &TurnSetup,
        response: &ProviderResponse,
        input_tokens: u64,
        output_tokens: u64,
        cost: f64,
        duration_ms: i64,
        tools_used: Vec<String>,
        options: &ChatOptions,
    ) -> Result<ChatOutcome, ChatError> {
        let messages = MessageStore::new(&self.pool);
        let metadata = json!({
            "usage": { "input": input_tokens, "output": output_tokens },
            "cost": cost,
            "duration_ms": duration_ms,
            "model": response.model,
            "provider": response.provider,
            "tools_used": tools_used,
            "call_type": options.call_type.as_str(),
            "temperature": turn.temperature,
            "memory_strategy": turn.memory.strategy_name(),
            "memory_n": options.memory_n,
            "stick_to_facts": options.stick_to_facts,
            "objective_responses": options.objective_responses,
        });

        let mut record = NewMessage::text(&turn.thread.id, "assistant", &response.content);
        record.model = Some(response.model.clone());
        record.provider = Some(response.provider.clone());
        record.input_tokens = input_tokens as i64;
        record.output_tokens = output_tokens as i64;
        record.cost = cost;
        record.latency_ms = duration_ms;
        record.metadata = metadata;
        let saved = messages.append(record).await?;

        let threads = ThreadStore::new(&self.pool);
        threads.record_turn(&turn.thread.id, (input_tokens + output_tokens) as i64).await?;

        let needs_summarization = self.summarization_due(turn).await?;

        Ok(ChatOutcome {
            message: saved,
            input_tokens,
            output_tokens,
            cost,
            duration_ms,
            tools_used,
            model: response.model.clone(),
            provider: response.provider.clone(),
            needs_summarization,
            user_context: turn.user_context.clone(),
        })
    }

    /// True when the unsummarized span has outgrown the summarize
    /// strategy's threshold.  Always false for other strategies.
    async fn summarization_due(&self, turn: &TurnSetup) -> Result<bool, ChatError> {
        let MemoryParams::Summarize { summarize_threshold_chars, .. } = &turn.memory else {
            return Ok(false);
        };
        let history: Vec<HistoryMessage> = MessageStore::new(&self.pool)
            .list(&turn.thread.id, 10_000)
            .await?
            .into_iter()
            .map(|m| HistoryMessage::new(m.id, m.role, m.content))
            .collect();
        let unsummarized = SummarizationHelper::unsummarized_chars(
            &history,
            turn.thread.summarized_until_msg_id.as_deref(),
        );
        Ok(unsummarized > *summarize_threshold_chars)
    }
}

/// Everything resolved once per turn before the lock is taken.
struct TurnSetup {
    thread: Thread,
    agent: Agent,
    user_context: Option<Value>,
    registry: Arc<ToolRegistry>,
    enforcer: CapabilityEnforcer,
    tool_specs: Vec<ToolSpec>,
    system_prompt: String,
    memory: MemoryParams,
    effective_model: String,
    temperature: f32,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
