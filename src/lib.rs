//! # keygate
//!
//! API key verification and rate limiting middleware for Axum, backed by a
//! remote key service:
//!
//! - **API keys**: `Authorization: Bearer <key>` verified against an API
//! - **Rate limiting**: per-identifier quota, remote or in-process
//! - **Hooks**: custom identifiers, exceeded / error responses, log sinks
//! - **Observability**: structured logging, Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Rate Limit → API Key)            → Decision    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Client traits (KeyVerifier, Ratelimiter)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  HttpKeyVerifier / HttpRatelimiter / LocalRatelimiter       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use axum::{Router, routing::get};
//! use keygate::client::{HttpKeyVerifier, RatelimitConfig, DEFAULT_TIMEOUT};
//! use keygate::config::DEFAULT_BASE_URL;
//! use keygate::middleware::{
//!     ApiKeyMiddlewareConfig, RatelimitMiddlewareConfig, create_api_key_middleware,
//!     create_ratelimit_middleware_from_config,
//! };
//!
//! fn app() -> anyhow::Result<Router> {
//!     let verifier = Arc::new(HttpKeyVerifier::new(DEFAULT_BASE_URL, DEFAULT_TIMEOUT)?);
//!     let api_key = create_api_key_middleware(ApiKeyMiddlewareConfig::new("api_123"), verifier);
//!
//!     let limits = RatelimitConfig::new("my-app", "root_key", 10, Duration::from_secs(60));
//!     let ratelimit = create_ratelimit_middleware_from_config(
//!         RatelimitMiddlewareConfig::new(limits)
//!             .on_exceeded(|_req: &axum::http::Request<axum::body::Body>| "Slow down"),
//!     )?;
//!
//!     Ok(Router::new()
//!         .route("/", get(|| async { "hello" }))
//!         .route_layer(api_key)
//!         .route_layer(ratelimit))
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult, ClientError, ClientResult};
pub use response::Decision;
pub use routes::{build_router, build_router_with};
pub use state::AppState;
