//! Clients for the remote key verification and rate limiting services.
//!
//! The middlewares only depend on the two narrow traits defined here:
//!
//! - [`KeyVerifier`] - verifies a bearer key against an API
//! - [`Ratelimiter`] - spends one unit of quota for an identifier
//!
//! Implementations:
//!
//! ```text
//! ┌────────────────────┐      ┌─────────────────────┐
//! │   KeyVerifier      │      │    Ratelimiter      │
//! └─────────┬──────────┘      └──────────┬──────────┘
//!           │                            ├─────────────────────┐
//!           ▼                            ▼                     ▼
//!   HttpKeyVerifier             HttpRatelimiter        LocalRatelimiter
//!   (POST keys.verifyKey)       (POST ratelimits.limit) (governor GCRA)
//! ```
//!
//! Tests substitute deterministic in-memory implementations.

pub mod http;
pub mod local;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_BASE_URL;
use crate::error::ClientResult;

pub use http::{HttpKeyVerifier, HttpRatelimiter};
pub use local::LocalRatelimiter;

/// Default timeout for calls to the key service.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Key Verification
// =============================================================================

/// Body of a key verification call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_id: Option<String>,
}

/// Verification outcome reported by the key service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResult {
    pub valid: bool,
    /// Machine readable reason, e.g. `VALID`, `NOT_FOUND`, `EXPIRED`, `RATE_LIMITED`.
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub remaining: Option<i64>,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

impl VerifyResult {
    /// A result carrying only validity and code.
    pub fn new(valid: bool, code: impl Into<String>) -> Self {
        Self {
            valid,
            code: code.into(),
            key_id: None,
            owner_id: None,
            remaining: None,
            meta: None,
        }
    }
}

/// Error reported by the key service itself (bad request, unknown API, ...).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceError {
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl ServiceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            request_id: None,
        }
    }
}

/// Discriminated response of a verification call.
///
/// Exactly one of `error` and `result` is expected to be set. Callers must
/// still handle both being empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifyResponse {
    pub error: Option<ServiceError>,
    pub result: Option<VerifyResult>,
}

impl VerifyResponse {
    pub fn from_result(result: VerifyResult) -> Self {
        Self {
            error: None,
            result: Some(result),
        }
    }

    pub fn from_error(error: ServiceError) -> Self {
        Self {
            error: Some(error),
            result: None,
        }
    }
}

/// Verifies bearer keys.
#[async_trait]
pub trait KeyVerifier: Send + Sync {
    /// Verify a key.
    ///
    /// `Err` means the call itself failed (network, decoding). A service that
    /// answered but refused the request reports it through
    /// [`VerifyResponse::error`].
    async fn verify(&self, request: VerifyRequest) -> ClientResult<VerifyResponse>;
}

// =============================================================================
// Rate Limiting
// =============================================================================

/// Construction parameters for a rate limiter client.
#[derive(Debug, Clone)]
pub struct RatelimitConfig {
    /// Partition identifiers share quota within.
    pub namespace: String,
    /// Root credential for the remote service.
    pub root_key: String,
    /// Requests allowed per window.
    pub limit: u32,
    /// Window length.
    pub duration: Duration,
    /// Let the service answer from its edge state instead of the origin.
    pub async_mode: bool,
    /// Base URL of the remote service.
    pub base_url: String,
    /// Per-call HTTP timeout.
    pub timeout: Duration,
}

impl RatelimitConfig {
    pub fn new(
        namespace: impl Into<String>,
        root_key: impl Into<String>,
        limit: u32,
        duration: Duration,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            root_key: root_key.into(),
            limit,
            duration,
            async_mode: false,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_async(mut self, async_mode: bool) -> Self {
        self.async_mode = async_mode;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RatelimitResponse {
    pub success: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Unix epoch in milliseconds at which the window resets.
    pub reset: i64,
}

/// Spends quota for identifiers.
#[async_trait]
pub trait Ratelimiter: Send + Sync {
    /// Record one request for `identifier` and report whether it is allowed.
    async fn limit(&self, identifier: &str) -> ClientResult<RatelimitResponse>;
}
