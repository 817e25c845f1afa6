// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//!
//! Bearer-token authentication and per-user rate limiting.
//!
//! All routes except `/healthz` require `Authorization: Bearer <jwt>`.
//! Token verification is a boundary call: the JWT carries the user id and
//! role, nothing else is consulted.  With `auth_enabled = false` (local
//! development) every request runs as a fixed default user.
//!
//! Rate limiting uses the `governor` crate (GCRA) keyed by user id, with
//! the bucket size and window from settings.  Exceeding it returns 429
//! with `Retry-After: 60`.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use parley_config::Settings;
use parley_store::CurrentUser;

use crate::{error::ApiError, state::AppContext};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    #[serde(default = "default_role")]
    pub role: String,
    /// Expiry, seconds since epoch.
    pub exp: usize,
}

fn default_role() -> String {
    "user".to_string()
}

fn algorithm(settings: &Settings) -> Algorithm {
    match settings.jwt_algorithm.as_str() {
        "HS384" => Algorithm::HS384,
        "HS512" => Algorithm::HS512,
        _ => Algorithm::HS256,
    }
}

/// Mint a token for a user — used by tests and the dev CLI.
pub fn issue_token(settings: &Settings, user_id: &str, role: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id.to_string(),
        role: role.to_string(),
        exp: (chrono::Utc::now()
            + chrono::Duration::hours(settings.jwt_expiry_hours as i64))
        .timestamp() as usize,
    };
    Ok(encode(
        &Header::new(algorithm(settings)),
        &claims,
        &EncodingKey::from_secret(settings.jwt_secret.as_bytes()),
    )?)
}

/// Verify a bearer token and produce the store-layer caller identity.
pub fn verify_token(settings: &Settings, token: &str) -> Result<CurrentUser, ApiError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(settings.jwt_secret.as_bytes()),
        &Validation::new(algorithm(settings)),
    )
    .map_err(|e| ApiError::Unauthorized(format!("invalid token: {e}")))?;
    Ok(CurrentUser::new(data.claims.sub, data.claims.role))
}

fn bearer_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Resolve the caller from request headers (the WS handler also accepts a
/// query-param token and calls [`verify_token`] directly).
pub fn authenticate(settings: &Settings, headers: &HeaderMap) -> Result<CurrentUser, ApiError> {
    if !settings.auth_enabled {
        return Ok(CurrentUser::new("default", "admin"));
    }
    let token = bearer_from_headers(headers)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;
    verify_token(settings, token)
}

/// Extractor: the authenticated caller.
pub struct AuthUser(pub CurrentUser);

#[axum::async_trait]
impl FromRequestParts<AppContext> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        authenticate(&state.settings, &parts.headers).map(AuthUser)
    }
}

// ── Rate limiting ─────────────────────────────────────────────────────────────

type UserLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<UserLimiter>,
}

impl RateLimitState {
    pub fn from_settings(settings: &Settings) -> Self {
        let requests = NonZeroU32::new(settings.rate_limit_requests.max(1)).expect("non-zero");
        let window = Duration::from_secs(settings.rate_limit_window_secs.max(1));
        // GCRA: one token replenished every window/requests, bucket of
        // `requests` for bursts.
        let quota = Quota::with_period(window / requests.get())
            .expect("non-zero period")
            .allow_burst(requests);
        Self { limiter: Arc::new(RateLimiter::keyed(quota)) }
    }

    pub fn check(&self, key: &str) -> bool {
        self.limiter.check_key(&key.to_string()).is_ok()
    }
}

/// Middleware: authenticate, then debit the caller's rate bucket.
pub async fn auth_and_rate_limit(
    State(ctx): State<AppContext>,
    axum::Extension(limits): axum::Extension<RateLimitState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let user = authenticate(&ctx.settings, req.headers())?;
    if !limits.check(&user.id) {
        return Err(ApiError::RateLimited("rate limit exceeded".into()));
    }
    Ok(next.run(req).await)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
