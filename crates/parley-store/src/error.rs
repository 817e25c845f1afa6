// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Document visibility must resolve to exactly one of: personal-to-agent,
/// workspace-shared, or system-global.
#[derive(Debug, Clone, Error)]
#[error("invalid document visibility: {0}")]
pub struct VisibilityError(pub String);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Visibility(#[from] VisibilityError),

    /// Creating an entity with contradictory ownership (e.g. a thread in a
    /// workspace its agent does not belong to).
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Only admins may perform this write (e.g. create a system-global
    /// document).
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("malformed stored JSON: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
