// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Authorization scope builders.
//!
//! The single rule: every query that touches workspace-scoped data carries a
//! WHERE fragment produced here, composed with `AND` into the caller's SQL.
//! There is no fetch-then-check path anywhere in the store layer — a row
//! outside the caller's scope is indistinguishable from a row that does not
//! exist.
//!
//! Admin bypass is centralized here and nowhere else: admins get the
//! always-true fragment.

use sqlx::SqlitePool;

use crate::error::{StoreResult, VisibilityError};

/// The authenticated caller as seen by the store layer.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub role: String,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self { id: id.into(), role: role.into() }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, "admin")
    }

    pub fn member(id: impl Into<String>) -> Self {
        Self::new(id, "user")
    }
}

pub fn is_admin(user: &CurrentUser) -> bool {
    user.role == "admin"
}

/// A WHERE fragment plus its bind parameters, composed with `AND`.
#[derive(Debug, Clone)]
pub struct Scope {
    pub clause: String,
    pub params: Vec<String>,
}

impl Scope {
    /// The admin scope: matches every row, binds nothing.
    pub fn unrestricted() -> Self {
        Self { clause: "1=1".into(), params: Vec::new() }
    }

    fn never() -> Self {
        Self { clause: "1=0".into(), params: Vec::new() }
    }
}

/// Ids of every workspace the user belongs to.
pub async fn user_workspace_ids(pool: &SqlitePool, user: &CurrentUser) -> StoreResult<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT workspace_id FROM workspace_members WHERE user_id = ?")
            .bind(&user.id)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn is_workspace_member(
    pool: &SqlitePool,
    workspace_id: &str,
    user_id: &str,
) -> StoreResult<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM workspace_members WHERE workspace_id = ? AND user_id = ?",
    )
    .bind(workspace_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

/// True when the user may administer the workspace (owner/admin role in the
/// membership row, or global admin).
pub async fn can_manage_workspace(
    pool: &SqlitePool,
    workspace_id: &str,
    user: &CurrentUser,
) -> StoreResult<bool> {
    if is_admin(user) {
        return Ok(true);
    }
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT role FROM workspace_members WHERE workspace_id = ? AND user_id = ?",
    )
    .bind(workspace_id)
    .bind(&user.id)
    .fetch_optional(pool)
    .await?;
    Ok(matches!(row, Some((role,)) if role == "owner" || role == "admin"))
}

/// `owner_user_id = me OR workspace_id IN (my workspaces)`.
///
/// The shared shape for threads and agents.
fn owner_or_workspace_scope(user: &CurrentUser, workspace_ids: &[String]) -> Scope {
    if is_admin(user) {
        return Scope::unrestricted();
    }
    if workspace_ids.is_empty() {
        return Scope { clause: "owner_user_id = ?".into(), params: vec![user.id.clone()] };
    }
    let placeholders = vec!["?"; workspace_ids.len()].join(", ");
    let mut params = vec![user.id.clone()];
    params.extend(workspace_ids.iter().cloned());
    Scope {
        clause: format!("(owner_user_id = ? OR workspace_id IN ({placeholders}))"),
        params,
    }
}

pub async fn thread_scope(pool: &SqlitePool, user: &CurrentUser) -> StoreResult<Scope> {
    let ids = if is_admin(user) { vec![] } else { user_workspace_ids(pool, user).await? };
    Ok(owner_or_workspace_scope(user, &ids))
}

pub async fn agent_scope(pool: &SqlitePool, user: &CurrentUser) -> StoreResult<Scope> {
    let ids = if is_admin(user) { vec![] } else { user_workspace_ids(pool, user).await? };
    Ok(owner_or_workspace_scope(user, &ids))
}

/// Workspaces the user belongs to.
pub async fn workspace_scope(pool: &SqlitePool, user: &CurrentUser) -> StoreResult<Scope> {
    if is_admin(user) {
        return Ok(Scope::unrestricted());
    }
    let ids = user_workspace_ids(pool, user).await?;
    if ids.is_empty() {
        return Ok(Scope::never());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    Ok(Scope { clause: format!("id IN ({placeholders})"), params: ids })
}

/// Documents resolve to exactly one of three visibility states:
/// workspace-shared, personal-to-agent, or system-global.
pub async fn document_scope(pool: &SqlitePool, user: &CurrentUser) -> StoreResult<Scope> {
    if is_admin(user) {
        return Ok(Scope::unrestricted());
    }
    let ids = user_workspace_ids(pool, user).await?;
    let mut params: Vec<String> = Vec::new();

    let workspace_arm = if ids.is_empty() {
        String::new()
    } else {
        let placeholders = vec!["?"; ids.len()].join(", ");
        params.extend(ids.iter().cloned());
        format!("workspace_id IN ({placeholders}) OR ")
    };

    // Personal-to-agent documents follow the agent's own visibility: the
    // agent's owner, or — when the agent is workspace-shared — every member
    // of that workspace.  System-global documents (both ids null) are
    // readable by everyone.
    let agent_arm = if ids.is_empty() {
        params.push(user.id.clone());
        "agent_id IN (SELECT id FROM agents WHERE owner_user_id = ?)".to_string()
    } else {
        let placeholders = vec!["?"; ids.len()].join(", ");
        params.push(user.id.clone());
        params.extend(ids.iter().cloned());
        format!(
            "agent_id IN (SELECT id FROM agents \
               WHERE owner_user_id = ? OR workspace_id IN ({placeholders}))"
        )
    };

    let clause = format!(
        "({workspace_arm}\
          (workspace_id IS NULL AND agent_id IS NULL) OR \
          (workspace_id IS NULL AND {agent_arm}))"
    );
    Ok(Scope { clause, params })
}

// ─── Document visibility invariant ────────────────────────────────────────────

/// The three legal document visibility states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentVisibility {
    PersonalToAgent,
    WorkspaceShared,
    SystemGlobal,
}

/// Validate a (workspace_id, agent_id) pair on create/update.
///
/// Creating a system-global document requires a global admin.  The check
/// runs before any row is written, so a violation never leaves a partial
/// record behind.
pub fn validate_document_visibility(
    workspace_id: Option<&str>,
    agent_id: Option<&str>,
    user: &CurrentUser,
) -> Result<DocumentVisibility, VisibilityError> {
    match (workspace_id, agent_id) {
        (Some(_), Some(_)) => Err(VisibilityError(
            "a document cannot be both workspace-shared and personal-to-agent".into(),
        )),
        (Some(_), None) => Ok(DocumentVisibility::WorkspaceShared),
        (None, Some(_)) => Ok(DocumentVisibility::PersonalToAgent),
        (None, None) => {
            if is_admin(user) {
                Ok(DocumentVisibility::SystemGlobal)
            } else {
                Err(VisibilityError("only admins may create system-global documents".into()))
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
