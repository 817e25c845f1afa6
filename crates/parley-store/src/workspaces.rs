// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::{
    authz::{can_manage_workspace, workspace_scope, CurrentUser},
    db::{new_id, now},
    error::{StoreError, StoreResult},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub metadata: Value,
    pub created_at: String,
    pub updated_at: String,
}

impl Workspace {
    fn from_row(row: &SqliteRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            metadata: row
                .try_get::<Option<String>, _>("metadata")?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(Value::Object(Default::default())),
            created_at: row.try_get::<Option<String>, _>("created_at")?.unwrap_or_default(),
            updated_at: row.try_get::<Option<String>, _>("updated_at")?.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceMember {
    pub workspace_id: String,
    pub user_id: String,
    pub role: String,
}

pub struct WorkspaceStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> WorkspaceStore<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a workspace; the creator becomes its owner member.
    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
        user: &CurrentUser,
    ) -> StoreResult<Workspace> {
        let id = new_id();
        let ts = now();
        sqlx::query(
            "INSERT INTO workspaces (id, name, description, metadata, created_at, updated_at)
             VALUES (?, ?, ?, '{}', ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(description)
        .bind(&ts)
        .bind(&ts)
        .execute(self.pool)
        .await?;

        sqlx::query(
            "INSERT INTO workspace_members (id, workspace_id, user_id, role, created_at)
             VALUES (?, ?, ?, 'owner', ?)",
        )
        .bind(new_id())
        .bind(&id)
        .bind(&user.id)
        .bind(&ts)
        .execute(self.pool)
        .await?;

        Ok(Workspace {
            id,
            name: name.to_string(),
            description: description.map(|s| s.to_string()),
            metadata: Value::Object(Default::default()),
            created_at: ts.clone(),
            updated_at: ts,
        })
    }

    pub async fn get(&self, workspace_id: &str, user: &CurrentUser) -> StoreResult<Option<Workspace>> {
        let scope = workspace_scope(self.pool, user).await?;
        let sql = format!(
            "SELECT * FROM workspaces WHERE id = ? AND deleted_at IS NULL AND {}",
            scope.clause
        );
        let mut query = sqlx::query(&sql).bind(workspace_id);
        for p in &scope.params {
            query = query.bind(p);
        }
        match query.fetch_optional(self.pool).await? {
            Some(row) => Ok(Some(Workspace::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list(&self, user: &CurrentUser) -> StoreResult<Vec<Workspace>> {
        let scope = workspace_scope(self.pool, user).await?;
        let sql = format!(
            "SELECT * FROM workspaces WHERE deleted_at IS NULL AND {}
             ORDER BY created_at DESC",
            scope.clause
        );
        let mut query = sqlx::query(&sql);
        for p in &scope.params {
            query = query.bind(p);
        }
        let rows = query.fetch_all(self.pool).await?;
        rows.iter().map(Workspace::from_row).collect()
    }

    /// Add or update a member.  Only workspace owners/admins (or a global
    /// admin) may manage membership.
    pub async fn add_member(
        &self,
        workspace_id: &str,
        user_id: &str,
        role: &str,
        acting: &CurrentUser,
    ) -> StoreResult<WorkspaceMember> {
        if !matches!(role, "owner" | "admin" | "member") {
            return Err(StoreError::InvalidReference(format!("unknown member role: {role}")));
        }
        if !can_manage_workspace(self.pool, workspace_id, acting).await? {
            return Err(StoreError::Forbidden("cannot manage this workspace".into()));
        }
        sqlx::query(
            "INSERT INTO workspace_members (id, workspace_id, user_id, role, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(workspace_id, user_id) DO UPDATE SET role = excluded.role",
        )
        .bind(new_id())
        .bind(workspace_id)
        .bind(user_id)
        .bind(role)
        .bind(now())
        .execute(self.pool)
        .await?;
        Ok(WorkspaceMember {
            workspace_id: workspace_id.to_string(),
            user_id: user_id.to_string(),
            role: role.to_string(),
        })
    }

    pub async fn remove_member(
        &self,
        workspace_id: &str,
        user_id: &str,
        acting: &CurrentUser,
    ) -> StoreResult<bool> {
        if !can_manage_workspace(self.pool, workspace_id, acting).await? {
            return Err(StoreError::Forbidden("cannot manage this workspace".into()));
        }
        let result =
            sqlx::query("DELETE FROM workspace_members WHERE workspace_id = ? AND user_id = ?")
                .bind(workspace_id)
                .bind(user_id)
                .execute(self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn members(&self, workspace_id: &str) -> StoreResult<Vec<WorkspaceMember>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT workspace_id, user_id, role FROM workspace_members
             WHERE workspace_id = ? ORDER BY created_at",
        )
        .bind(workspace_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(workspace_id, user_id, role)| WorkspaceMember { workspace_id, user_id, role })
            .collect())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    #[tokio::test]
    async fn creator_becomes_owner_member() {
        let pool = memory_pool().await.unwrap();
        let store = WorkspaceStore::new(&pool);
        let ws = store.create("team", Some("the team"), &CurrentUser::member("alice")).await.unwrap();

        let members = store.members(&ws.id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, "alice");
        assert_eq!(members[0].role, "owner");
    }

    #[tokio::test]
    async fn members_see_workspace_others_do_not() {
        let pool = memory_pool().await.unwrap();
        let store = WorkspaceStore::new(&pool);
        let ws = store.create("team", None, &CurrentUser::member("alice")).await.unwrap();

        assert!(store.get(&ws.id, &CurrentUser::member("alice")).await.unwrap().is_some());
        assert!(store.get(&ws.id, &CurrentUser::member("bob")).await.unwrap().is_none());
        assert!(store.get(&ws.id, &CurrentUser::admin("root")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn only_managers_add_members() {
        let pool = memory_pool().await.unwrap();
        let store = WorkspaceStore::new(&pool);
        let alice = CurrentUser::member("alice");
        let ws = store.create("team", None, &alice).await.unwrap();

        store.add_member(&ws.id, "bob", "member", &alice).await.unwrap();
        // bob is a plain member and cannot add others.
        let err =
            store.add_member(&ws.id, "carol", "member", &CurrentUser::member("bob")).await;
        assert!(matches!(err, Err(StoreError::Forbidden(_))));
        // Now bob can see the workspace.
        assert!(store.get(&ws.id, &CurrentUser::member("bob")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn add_member_is_upsert_on_role() {
        let pool = memory_pool().await.unwrap();
        let store = WorkspaceStore::new(&pool);
        let alice = CurrentUser::member("alice");
        let ws = store.create("team", None, &alice).await.unwrap();

        store.add_member(&ws.id, "bob", "member", &alice).await.unwrap();
        store.add_member(&ws.id, "bob", "admin", &alice).await.unwrap();
        let members = store.members(&ws.id).await.unwrap();
        let bob = members.iter().find(|m| m.user_id == "bob").unwrap();
        assert_eq!(bob.role, "admin");
        assert_eq!(members.len(), 2);
    }

    #[tokio::test]
    async fn invalid_role_is_rejected() {
        let pool = memory_pool().await.unwrap();
        let store = WorkspaceStore::new(&pool);
        let alice = CurrentUser::member("alice");
        let ws = store.create("team", None, &alice).await.unwrap();
        let err = store.add_member(&ws.id, "bob", "emperor", &alice).await;
        assert!(matches!(err, Err(StoreError::InvalidReference(_))));
    }

    #[tokio::test]
    async fn remove_member_revokes_visibility() {
        let pool = memory_pool().await.unwrap();
        let store = WorkspaceStore::new(&pool);
        let alice = CurrentUser::member("alice");
        let ws = store.create("team", None, &alice).await.unwrap();
        store.add_member(&ws.id, "bob", "member", &alice).await.unwrap();

        assert!(store.remove_member(&ws.id, "bob", &alice).await.unwrap());
        assert!(store.get(&ws.id, &CurrentUser::member("bob")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_scoped() {
        let pool = memory_pool().await.unwrap();
        let store = WorkspaceStore::new(&pool);
        store.create("alpha", None, &CurrentUser::member("alice")).await.unwrap();
        store.create("beta", None, &CurrentUser::member("bob")).await.unwrap();

        let alices = store.list(&CurrentUser::member("alice")).await.unwrap();
        assert_eq!(alices.len(), 1);
        assert_eq!(alices[0].name, "alpha");
        assert_eq!(store.list(&CurrentUser::admin("root")).await.unwrap().len(), 2);
    }
}
