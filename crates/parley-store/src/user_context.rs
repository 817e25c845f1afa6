// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Per-user persistent context, stored as one JSON blob per user.
//!
//! Updates use deep-merge semantics: nested objects recurse, `null` deletes
//! a key, lists replace wholesale.  The caller wraps updates in the
//! `user_context` lock, so the read-merge-write here never interleaves.

use serde_json::Value;
use sqlx::{Row, SqlitePool};

use crate::{
    db::{new_id, now},
    error::StoreResult,
};

/// Deep merge `updates` into `base`.
pub fn deep_merge(base: &Value, updates: &Value) -> Value {
    let (Value::Object(base_map), Value::Object(update_map)) = (base, updates) else {
        return updates.clone();
    };
    let mut merged = base_map.clone();
    for (key, value) in update_map {
        match value {
            Value::Null => {
                merged.remove(key);
            }
            Value::Object(_) if merged.get(key).map(|v| v.is_object()).unwrap_or(false) => {
                let inner = deep_merge(&merged[key], value);
                merged.insert(key.clone(), inner);
            }
            other => {
                merged.insert(key.clone(), other.clone());
            }
        }
    }
    Value::Object(merged)
}

pub struct UserContextStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserContextStore<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, user_id: &str) -> StoreResult<Option<Value>> {
        let row = sqlx::query(
            "SELECT content FROM user_context
             WHERE user_id = ? AND context_type = 'profile' LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.and_then(|r| {
            r.try_get::<Option<String>, _>("content")
                .ok()
                .flatten()
                .and_then(|s| serde_json::from_str(&s).ok())
        }))
    }

    /// Replace the stored context wholesale.
    pub async fn set(&self, user_id: &str, content: &Value, reason: Option<&str>) -> StoreResult<()> {
        let ts = now();
        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM user_context WHERE user_id = ? AND context_type = 'profile' LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        match existing {
            Some((id,)) => {
                sqlx::query(
                    "UPDATE user_context SET content = ?, last_reason = ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(content.to_string())
                .bind(reason)
                .bind(&ts)
                .bind(id)
                .execute(self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO user_context
                         (id, user_id, context_type, content, last_reason, created_at, updated_at)
                     VALUES (?, ?, 'profile', ?, ?, ?, ?)",
                )
                .bind(new_id())
                .bind(user_id)
                .bind(content.to_string())
                .bind(reason)
                .bind(&ts)
                .bind(&ts)
                .execute(self.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Deep-merge `updates` into the stored context; returns the merged
    /// result.
    pub async fn update(&self, user_id: &str, updates: &Value, reason: &str) -> StoreResult<Value> {
        let current = self.get(user_id).await?.unwrap_or(Value::Object(Default::default()));
        let merged = deep_merge(&current, updates);
        self.set(user_id, &merged, Some(reason)).await?;
        Ok(merged)
    }

    pub async fn delete(&self, user_id: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM user_context WHERE user_id = ? AND context_type = 'profile'",
        )
        .bind(user_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
