// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::{
    authz::{agent_scope, is_admin, is_workspace_member, CurrentUser},
    db::{new_id, now},
    error::{StoreError, StoreResult},
};

/// An agent row: an immutable-identity LLM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
    pub provider: String,
    pub model: String,
    pub premium_provider: Option<String>,
    pub premium_model: Option<String>,
    pub temperature: f64,
    pub max_tokens: i64,
    pub tools: Vec<String>,
    pub capabilities: Vec<String>,
    pub context_schema: Option<Value>,
    pub memory_strategy: String,
    pub memory_params: Value,
    pub owner_user_id: Option<String>,
    pub workspace_id: Option<String>,
    pub metadata: Value,
    pub created_at: String,
    pub updated_at: String,
}

fn json_or<T: serde::de::DeserializeOwned>(raw: Option<String>, default: T) -> T {
    raw.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or(default)
}

impl Agent {
    fn from_row(row: &SqliteRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            system_prompt: row.try_get::<Option<String>, _>("system_prompt")?.unwrap_or_default(),
            provider: row.try_get("provider")?,
            model: row.try_get("model")?,
            premium_provider: row.try_get("premium_provider")?,
            premium_model: row.try_get("premium_model")?,
            temperature: row.try_get("temperature")?,
            max_tokens: row.try_get("max_tokens")?,
            tools: json_or(row.try_get("tools")?, Vec::new()),
            capabilities: json_or(row.try_get("capabilities")?, Vec::new()),
            context_schema: row
                .try_get::<Option<String>, _>("context_schema")?
                .and_then(|s| serde_json::from_str(&s).ok()),
            memory_strategy: row.try_get("memory_strategy")?,
            memory_params: json_or(row.try_get("memory_params")?, Value::Object(Default::default())),
            owner_user_id: row.try_get("owner_user_id")?,
            workspace_id: row.try_get("workspace_id")?,
            metadata: json_or(row.try_get("metadata")?, Value::Object(Default::default())),
            created_at: row.try_get::<Option<String>, _>("created_at")?.unwrap_or_default(),
            updated_at: row.try_get::<Option<String>, _>("updated_at")?.unwrap_or_default(),
        })
    }
}

/// Fields for creating an agent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentCreate {
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub premium_provider: Option<String>,
    pub premium_model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub context_schema: Option<Value>,
    pub memory_strategy: Option<String>,
    pub memory_params: Option<Value>,
    /// Present → shared agent in that workspace; absent → personal agent.
    pub workspace_id: Option<String>,
}

/// Patchable agent fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentUpdate {
    pub name: Option<String>,
    pub system_prompt: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub premium_provider: Option<Option<String>>,
    pub premium_model: Option<Option<String>>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i64>,
    pub tools: Option<Vec<String>>,
    pub capabilities: Option<Vec<String>>,
    pub memory_strategy: Option<String>,
    pub memory_params: Option<Value>,
}

pub struct AgentStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AgentStore<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an agent.  Exactly one of `owner_user_id` / `workspace_id`
    /// ends up set: workspace agents require membership, everything else is
    /// personal to the creator.
    pub async fn create(&self, input: AgentCreate, user: &CurrentUser) -> StoreResult<Agent> {
        let (owner, workspace) = match &input.workspace_id {
            Some(ws) => {
                if !is_admin(user) && !is_workspace_member(self.pool, ws, &user.id).await? {
                    return Err(StoreError::Forbidden(format!(
                        "not a member of workspace {ws}"
                    )));
                }
                (None, Some(ws.clone()))
            }
            None => (Some(user.id.clone()), None),
        };

        let id = new_id();
        let ts = now();
        sqlx::query(
            "INSERT INTO agents (id, name, system_prompt, provider, model,
                 premium_provider, premium_model, temperature, max_tokens,
                 tools, capabilities, context_schema, memory_strategy, memory_params,
                 owner_user_id, workspace_id, metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&input.name)
        .bind(&input.system_prompt)
        .bind(input.provider.as_deref().unwrap_or("anthropic"))
        .bind(input.model.as_deref().unwrap_or("claude-sonnet-4-20250514"))
        .bind(&input.premium_provider)
        .bind(&input.premium_model)
        .bind(input.temperature.unwrap_or(0.7))
        .bind(input.max_tokens.unwrap_or(4096))
        .bind(serde_json::to_string(&input.tools).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&input.capabilities).unwrap_or_else(|_| "[]".into()))
        .bind(input.context_schema.as_ref().map(|v| v.to_string()))
        .bind(input.memory_strategy.as_deref().unwrap_or("last_n"))
        .bind(
            input
                .memory_params
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "{\"n\": 20}".into()),
        )
        .bind(&owner)
        .bind(&workspace)
        .bind("{}")
        .bind(&ts)
        .bind(&ts)
        .execute(self.pool)
        .await?;

        self.get(&id, user).await?.ok_or_else(|| {
            StoreError::InvalidReference("agent vanished immediately after insert".into())
        })
    }

    /// Unscoped fetch for internal wiring AFTER the caller has already been
    /// authorized through the owning thread.  Route handlers never call
    /// this directly.
    pub async fn get_unscoped(&self, agent_id: &str) -> StoreResult<Option<Agent>> {
        match sqlx::query("SELECT * FROM agents WHERE id = ? AND deleted_at IS NULL")
            .bind(agent_id)
            .fetch_optional(self.pool)
            .await?
        {
            Some(row) => Ok(Some(Agent::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Fetch under scope; `None` for absent and out-of-scope alike.
    pub async fn get(&self, agent_id: &str, user: &CurrentUser) -> StoreResult<Option<Agent>> {
        let scope = agent_scope(self.pool, user).await?;
        let sql = format!(
            "SELECT * FROM agents WHERE id = ? AND deleted_at IS NULL AND {}",
            scope.clause
        );
        let mut query = sqlx::query(&sql).bind(agent_id);
        for p in &scope.params {
            query = query.bind(p);
        }
        match query.fetch_optional(self.pool).await? {
            Some(row) => Ok(Some(Agent::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list(&self, user: &CurrentUser, limit: i64) -> StoreResult<Vec<Agent>> {
        let scope = agent_scope(self.pool, user).await?;
        let sql = format!(
            "SELECT * FROM agents WHERE deleted_at IS NULL AND {}
             ORDER BY created_at DESC LIMIT ?",
            scope.clause
        );
        let mut query = sqlx::query(&sql);
        for p in &scope.params {
            query = query.bind(p);
        }
        let rows = query.bind(limit).fetch_all(self.pool).await?;
        rows.iter().map(Agent::from_row).collect()
    }

    pub async fn update(
        &self,
        agent_id: &str,
        input: AgentUpdate,
        user: &CurrentUser,
    ) -> StoreResult<Option<Agent>> {
        let Some(mut agent) = self.get(agent_id, user).await? else {
            return Ok(None);
        };

        if let Some(v) = input.name {
            agent.name = v;
        }
        if let Some(v) = input.system_prompt {
            agent.system_prompt = v;
        }
        if let Some(v) = input.provider {
            agent.provider = v;
        }
        if let Some(v) = input.model {
            agent.model = v;
        }
        if let Some(v) = input.premium_provider {
            agent.premium_provider = v;
        }
        if let Some(v) = input.premium_model {
            agent.premium_model = v;
        }
        if let Some(v) = input.temperature {
            agent.temperature = v;
        }
        if let Some(v) = input.max_tokens {
            agent.max_tokens = v;
        }
        if let Some(v) = input.tools {
            agent.tools = v;
        }
        if let Some(v) = input.capabilities {
            agent.capabilities = v;
        }
        if let Some(v) = input.memory_strategy {
            agent.memory_strategy = v;
        }
        if let Some(v) = input.memory_params {
            agent.memory_params = v;
        }
        agent.updated_at = now();

        let scope = agent_scope(self.pool, user).await?;
        let sql = format!(
            "UPDATE agents SET name = ?, system_prompt = ?, provider = ?, model = ?,
                 premium_provider = ?, premium_model = ?, temperature = ?, max_tokens = ?,
                 tools = ?, capabilities = ?, memory_strategy = ?, memory_params = ?,
                 updated_at = ?
             WHERE id = ? AND deleted_at IS NULL AND {}",
            scope.clause
        );
        let mut query = sqlx::query(&sql)
            .bind(&agent.name)
            .bind(&agent.system_prompt)
            .bind(&agent.provider)
            .bind(&agent.model)
            .bind(&agent.premium_provider)
            .bind(&agent.premium_model)
            .bind(agent.temperature)
            .bind(agent.max_tokens)
            .bind(serde_json::to_string(&agent.tools).unwrap_or_else(|_| "[]".into()))
            .bind(serde_json::to_string(&agent.capabilities).unwrap_or_else(|_| "[]".into()))
            .bind(&agent.memory_strategy)
            .bind(agent.memory_params.to_string())
            .bind(&agent.updated_at)
            .bind(agent_id);
        for p in &scope.params {
            query = query.bind(p);
        }
        query.execute(self.pool).await?;
        Ok(Some(agent))
    }

    /// Soft delete.  Returns whether a row was affected.
    pub async fn delete(&self, agent_id: &str, user: &CurrentUser) -> StoreResult<bool> {
        let scope = agent_scope(self.pool, user).await?;
        let sql = format!(
            "UPDATE agents SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL AND {}",
            scope.clause
        );
        let mut query = sqlx::query(&sql).bind(now()).bind(agent_id);
        for p in &scope.params {
            query = query.bind(p);
        }
        Ok(query.execute(self.pool).await?.rows_affected() > 0)
    }

    /// Duplicate an agent as a personal copy for the caller.
    pub async fn clone_agent(
        &self,
        agent_id: &str,
        new_name: Option<String>,
        user: &CurrentUser,
    ) -> StoreResult<Option<Agent>> {
        let Some(source) = self.get(agent_id, user).await? else {
            return Ok(None);
        };
        let input = AgentCreate {
            name: new_name.unwrap_or_else(|| format!("{} (copy)", source.name)),
            system_prompt: source.system_prompt,
            provider: Some(source.provider),
            model: Some(source.model),
            premium_provider: source.premium_provider,
            premium_model: source.premium_model,
            temperature: Some(source.temperature),
            max_tokens: Some(source.max_tokens),
            tools: source.tools,
            capabilities: source.capabilities,
            context_schema: source.context_schema,
            memory_strategy: Some(source.memory_strategy),
            memory_params: Some(source.memory_params),
            workspace_id: None,
        };
        Ok(Some(self.create(input, user).await?))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::workspaces::WorkspaceStore;

    fn basic(name: &str) -> AgentCreate {
        AgentCreate { name: name.into(), ..Default::default() }
    }

    #[tokio::test]
    async fn create_personal_agent_sets_owner() {
        let pool = memory_pool().await.unwrap();
        let store = AgentStore::new(&pool);
        let user = CurrentUser::member("u-1");
        let agent = store.create(basic("helper"), &user).await.unwrap();
        assert_eq!(agent.owner_user_id.as_deref(), Some("u-1"));
        assert!(agent.workspace_id.is_none());
        assert_eq!(agent.memory_strategy, "last_n");
    }

    #[tokio::test]
    async fn workspace_agent_requires_membership() {
        let pool = memory_pool().await.unwrap();
        let ws = WorkspaceStore::new(&pool)
            .create("team", None, &CurrentUser::member("owner"))
            .await
            .unwrap();

        let store = AgentStore::new(&pool);
        let outsider = CurrentUser::member("outsider");
        let mut input = basic("shared");
        input.workspace_id = Some(ws.id.clone());
        let err = store.create(input.clone(), &outsider).await.unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));

        let member = CurrentUser::member("owner");
        let agent = store.create(input, &member).await.unwrap();
        assert!(agent.owner_user_id.is_none());
        assert_eq!(agent.workspace_id.as_deref(), Some(ws.id.as_str()));
    }

    #[tokio::test]
    async fn get_is_scope_checked() {
        let pool = memory_pool().await.unwrap();
        let store = AgentStore::new(&pool);
        let owner = CurrentUser::member("owner");
        let agent = store.create(basic("private"), &owner).await.unwrap();

        // The owner sees it; a stranger gets None, indistinguishable from
        // a missing row.
        assert!(store.get(&agent.id, &owner).await.unwrap().is_some());
        assert!(store.get(&agent.id, &CurrentUser::member("stranger")).await.unwrap().is_none());
        assert!(store.get("no-such-id", &owner).await.unwrap().is_none());
        // Admins see everything.
        assert!(store.get(&agent.id, &CurrentUser::admin("root")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_patches_only_given_fields() {
        let pool = memory_pool().await.unwrap();
        let store = AgentStore::new(&pool);
        let user = CurrentUser::member("u");
        let agent = store.create(basic("v1"), &user).await.unwrap();

        let update = AgentUpdate {
            name: Some("v2".into()),
            temperature: Some(0.1),
            ..Default::default()
        };
        let updated = store.update(&agent.id, update, &user).await.unwrap().unwrap();
        assert_eq!(updated.name, "v2");
        assert!((updated.temperature - 0.1).abs() < 1e-9);
        assert_eq!(updated.provider, agent.provider);
    }

    #[tokio::test]
    async fn delete_is_soft_and_scoped() {
        let pool = memory_pool().await.unwrap();
        let store = AgentStore::new(&pool);
        let user = CurrentUser::member("u");
        let agent = store.create(basic("gone"), &user).await.unwrap();

        assert!(!store.delete(&agent.id, &CurrentUser::member("other")).await.unwrap());
        assert!(store.delete(&agent.id, &user).await.unwrap());
        assert!(store.get(&agent.id, &user).await.unwrap().is_none());
        // Second delete is a no-op.
        assert!(!store.delete(&agent.id, &user).await.unwrap());
    }

    #[tokio::test]
    async fn clone_creates_personal_copy() {
        let pool = memory_pool().await.unwrap();
        let store = AgentStore::new(&pool);
        let user = CurrentUser::member("u");
        let mut input = basic("original");
        input.tools = vec!["calculator".into()];
        let agent = store.create(input, &user).await.unwrap();

        let copy = store.clone_agent(&agent.id, None, &user).await.unwrap().unwrap();
        assert_ne!(copy.id, agent.id);
        assert_eq!(copy.name, "original (copy)");
        assert_eq!(copy.tools, vec!["calculator".to_string()]);
        assert_eq!(copy.owner_user_id.as_deref(), Some("u"));
    }

    #[tokio::test]
    async fn list_only_returns_visible_agents() {
        let pool = memory_pool().await.unwrap();
        let store = AgentStore::new(&pool);
        store.create(basic("mine"), &CurrentUser::member("me")).await.unwrap();
        store.create(basic("theirs"), &CurrentUser::member("them")).await.unwrap();

        let mine = store.list(&CurrentUser::member("me"), 50).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].name, "mine");

        let all = store.list(&CurrentUser::admin("root"), 50).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
