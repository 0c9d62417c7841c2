//! Demo routing with both middlewares applied.
//!
//! # Route Groups
//!
//! - `/health` - open
//! - `/protected` - API key
//! - `/limited` - rate limit
//! - `/api/echo` - rate limit, then API key
//!
//! # Middleware Stack
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded (route groups using it)
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │     API Key      │ ← 401 / 500 (route groups using it)
//! └────────┬─────────┘
//!          │
//!          ▼
//!      Handler
//! ```

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::client::{HttpKeyVerifier, LocalRatelimiter, RatelimitConfig};
use crate::config::{Config, RatelimitBackend};
use crate::error::AppResult;
use crate::handlers;
use crate::middleware::{
    ApiKeyMiddleware, ApiKeyMiddlewareConfig, RatelimitMiddleware, RatelimitMiddlewareConfig,
    create_api_key_middleware, create_ratelimit_middleware,
    create_ratelimit_middleware_from_config,
};
use crate::state::AppState;

/// Limiter construction parameters derived from the application config.
pub fn ratelimit_config(config: &Config) -> RatelimitConfig {
    RatelimitConfig::new(
        config.ratelimit_namespace.clone(),
        config.root_key.clone().unwrap_or_default(),
        config.ratelimit_limit,
        config.ratelimit_duration,
    )
    .with_async(config.ratelimit_async)
    .with_base_url(config.base_url.clone())
    .with_timeout(config.http_timeout)
}

/// Build both middlewares from the application config.
///
/// # Errors
///
/// Returns `AppError::Client` if a client cannot be constructed.
pub fn build_middlewares(config: &Config) -> AppResult<(ApiKeyMiddleware, RatelimitMiddleware)> {
    let verifier = HttpKeyVerifier::new(&config.base_url, config.http_timeout)?;
    let api_key_config = ApiKeyMiddlewareConfig {
        api_id: config.api_id.clone(),
        bypass_paths: config.auth_bypass_paths.clone(),
    };
    let api_key = create_api_key_middleware(api_key_config, Arc::new(verifier));
    match api_key.api_id() {
        Some(api_id) => info!(api_id, "API key verification enabled"),
        None => info!("API key verification enabled without an API id"),
    }

    let ratelimit_config = RatelimitMiddlewareConfig::new(ratelimit_config(config));
    let ratelimit = match config.ratelimit_backend {
        RatelimitBackend::Remote => create_ratelimit_middleware_from_config(ratelimit_config)?,
        RatelimitBackend::Local => {
            let limiter = LocalRatelimiter::from_config(&ratelimit_config.config)?;
            info!(
                namespace = limiter.namespace(),
                limit = ratelimit_config.config.limit,
                duration_ms = ratelimit_config.config.duration.as_millis() as u64,
                "In-process rate limiter configured"
            );
            create_ratelimit_middleware(ratelimit_config, Arc::new(limiter))
        }
    };

    Ok((api_key, ratelimit))
}

/// Build the application router from its config.
///
/// # Errors
///
/// Returns an error if the middlewares cannot be built.
pub fn build_router(state: AppState) -> AppResult<Router> {
    let (api_key, ratelimit) = build_middlewares(&state.config)?;
    Ok(build_router_with(state, api_key, ratelimit))
}

/// Build the application router around already constructed middlewares.
pub fn build_router_with(
    state: AppState,
    api_key: ApiKeyMiddleware,
    ratelimit: RatelimitMiddleware,
) -> Router {
    let protected = Router::new()
        .route("/protected", get(handlers::protected))
        .route_layer(api_key.clone());

    let limited = Router::new()
        .route("/limited", get(handlers::limited))
        .route_layer(ratelimit.clone());

    // route_layer wraps what is already there, so the rate limiter runs first
    let echo = Router::new()
        .route("/api/echo", post(handlers::echo))
        .route_layer(api_key)
        .route_layer(ratelimit);

    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(protected)
        .merge(limited)
        .merge(echo)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
