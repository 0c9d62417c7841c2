//! reqwest-backed clients for the remote key service.
//!
//! # Endpoints
//!
//! - `POST {base_url}/v1/keys.verifyKey` - body `{"key", "apiId"}`
//! - `POST {base_url}/v1/ratelimits.limit` - body
//!   `{"namespace", "identifier", "limit", "duration", "async"}`, authorized
//!   with the root key as a bearer token
//!
//! Non-2xx answers carry `{"error": {"code", "message", "requestId"}}`.
//!
//! Neither client retries. Timeouts are enforced by the underlying
//! `reqwest::Client`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    KeyVerifier, RatelimitConfig, RatelimitResponse, Ratelimiter, ServiceError, VerifyRequest,
    VerifyResponse, VerifyResult,
};
use crate::error::{ClientError, ClientResult};

const VERIFY_KEY_PATH: &str = "/v1/keys.verifyKey";
const RATELIMIT_PATH: &str = "/v1/ratelimits.limit";

/// Error envelope returned by the service on non-2xx answers.
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ServiceError,
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

// =============================================================================
// Key Verification
// =============================================================================

/// Key verifier talking to the remote service over HTTP.
#[derive(Clone)]
pub struct HttpKeyVerifier {
    client: Client,
    url: String,
}

impl HttpKeyVerifier {
    /// Create a verifier for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Transport` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> ClientResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: endpoint(base_url, VERIFY_KEY_PATH),
        })
    }
}

#[async_trait]
impl KeyVerifier for HttpKeyVerifier {
    async fn verify(&self, request: VerifyRequest) -> ClientResult<VerifyResponse> {
        let response = self.client.post(&self.url).json(&request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            let result: VerifyResult = serde_json::from_str(&body)?;
            debug!(valid = result.valid, code = %result.code, "Key verified");
            return Ok(VerifyResponse::from_result(result));
        }

        match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => {
                warn!(
                    status = status.as_u16(),
                    code = %envelope.error.code,
                    "Key service refused verification request"
                );
                Ok(VerifyResponse::from_error(envelope.error))
            }
            Err(_) => Err(ClientError::Status {
                status: status.as_u16(),
                body,
            }),
        }
    }
}

// =============================================================================
// Rate Limiting
// =============================================================================

#[derive(Serialize)]
struct LimitRequest<'a> {
    namespace: &'a str,
    identifier: &'a str,
    limit: u32,
    /// Window length in milliseconds.
    duration: u64,
    #[serde(rename = "async")]
    async_mode: bool,
}

/// Rate limiter delegating every decision to the remote service.
///
/// Built once per middleware and shared across requests; it holds no
/// per-request state.
#[derive(Clone)]
pub struct HttpRatelimiter {
    client: Client,
    url: String,
    namespace: String,
    limit: u32,
    duration_ms: u64,
    async_mode: bool,
}

impl HttpRatelimiter {
    /// Create a rate limiter from its construction parameters.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidConfig` for an empty namespace or root key,
    /// a zero limit or an empty window, and `ClientError::Transport` if the
    /// HTTP client cannot be built.
    pub fn new(config: &RatelimitConfig) -> ClientResult<Self> {
        if config.namespace.trim().is_empty() {
            return Err(ClientError::InvalidConfig(
                "ratelimit namespace must not be empty".to_string(),
            ));
        }
        if config.root_key.trim().is_empty() {
            return Err(ClientError::InvalidConfig(
                "ratelimit root key must not be empty".to_string(),
            ));
        }
        if config.limit == 0 {
            return Err(ClientError::InvalidConfig(
                "ratelimit limit must be greater than 0".to_string(),
            ));
        }
        let duration_ms = u64::try_from(config.duration.as_millis()).unwrap_or(u64::MAX);
        if duration_ms == 0 {
            return Err(ClientError::InvalidConfig(
                "ratelimit duration must be at least 1ms".to_string(),
            ));
        }

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.root_key))
            .map_err(|e| ClientError::InvalidConfig(format!("invalid root key: {e}")))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            url: endpoint(&config.base_url, RATELIMIT_PATH),
            namespace: config.namespace.clone(),
            limit: config.limit,
            duration_ms,
            async_mode: config.async_mode,
        })
    }
}

#[async_trait]
impl Ratelimiter for HttpRatelimiter {
    async fn limit(&self, identifier: &str) -> ClientResult<RatelimitResponse> {
        let body = LimitRequest {
            namespace: &self.namespace,
            identifier,
            limit: self.limit,
            duration: self.duration_ms,
            async_mode: self.async_mode,
        };

        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();

        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
