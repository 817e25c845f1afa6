// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use parley_core::ChatError;
use parley_jobs::JobClientError;
use parley_model::ProviderError;
use parley_store::StoreError;

/// Gateway-level error with a fixed HTTP mapping.
///
/// Not-found deliberately covers out-of-scope: a caller can never learn
/// whether an id exists outside their scope.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    PaymentRequired(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    RateLimited(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Internal(_)) {
            error!("internal error: {self}");
        }
        let status = self.status();
        let body = Json(json!({ "error": self.to_string() }));
        if matches!(self, ApiError::RateLimited(_)) {
            (status, [(header::RETRY_AFTER, "60")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Visibility(v) => ApiError::BadRequest(v.to_string()),
            StoreError::InvalidReference(m) => ApiError::BadRequest(m),
            StoreError::Forbidden(m) => ApiError::Forbidden(m),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::RateLimited(m) => {
                ApiError::RateLimited(format!("Rate limit exceeded: {m}"))
            }
            ProviderError::Unavailable(m) => ApiError::Unavailable(m),
            ProviderError::ContextTooLong(_) => ApiError::BadRequest(
                "conversation too long for the model; reduce history or switch memory strategy"
                    .into(),
            ),
            ProviderError::Auth(m) => ApiError::Internal(format!("provider auth: {m}")),
            ProviderError::Other(m) => ApiError::Internal(m),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::NotFound(m) => ApiError::NotFound(m),
            ChatError::Budget(b) => ApiError::PaymentRequired(b.to_string()),
            ChatError::Busy => ApiError::Unavailable("thread busy".into()),
            ChatError::Provider(p) => p.into(),
            ChatError::Store(s) => s.into(),
            ChatError::Internal(m) => ApiError::Internal(m),
        }
    }
}

impl From<JobClientError> for ApiError {
    fn from(e: JobClientError) -> Self {
        match e {
            JobClientError::Queue(m) => {
                ApiError::Unavailable(format!("async processing unavailable: {m}"))
            }
            JobClientError::Store(s) => s.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ─── Unit tests ──────────────────────────────────────────────────────────────
