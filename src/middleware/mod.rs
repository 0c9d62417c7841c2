//! HTTP middleware guarding routes with the remote key service.
//!
//! - **API key verification**: bearer keys checked against an API
//! - **Rate limiting**: per-identifier quota, client IP by default
//!
//! # Architecture
//!
//! ```text
//! Request → Rate Limiter → API Key → Handler → Response
//!              ↓              ↓
//!          429 / 500      401 / 500
//! ```
//!
//! Both can also be used outside of tower through their `check` methods,
//! which return a [`crate::response::Decision`].

pub mod api_key;
pub mod ip;
pub mod ratelimit;

pub use api_key::{
    ApiKeyMiddleware, ApiKeyMiddlewareConfig, VerifiedKey, create_api_key_middleware,
    parse_bearer,
};
pub use ip::{UNKNOWN_IP, extract_client_ip};
pub use ratelimit::{
    LogEntry, RatelimitEvent, RatelimitLogger, RatelimitMiddleware, RatelimitMiddlewareConfig,
    TracingLogger, create_ratelimit_middleware, create_ratelimit_middleware_from_config,
};
