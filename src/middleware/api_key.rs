//! API key verification middleware.
//!
//! Verifies the bearer key of every request against the remote key service.
//!
//! # Decision Table
//!
//! | Situation                                        | Outcome      |
//! |--------------------------------------------------|--------------|
//! | Path in bypass list                              | continue     |
//! | No / malformed `Authorization: Bearer <key>`     | 401, no call |
//! | Service call failed                              | 500          |
//! | Service answered with an error (e.g. bad API id) | 500          |
//! | Service answered `valid: false`                  | 401          |
//! | Service answered `valid: true`                   | continue     |
//! | Service answered with neither result nor error   | 500          |
//!
//! A misconfigured API id is an operator problem, not a client one, which is
//! why it surfaces as 500 rather than 401.
//!
//! # Usage
//!
//! ```rust,ignore
//! let verifier = Arc::new(HttpKeyVerifier::new(DEFAULT_BASE_URL, DEFAULT_TIMEOUT)?);
//! let api_key = create_api_key_middleware(ApiKeyMiddlewareConfig::new("api_123"), verifier);
//!
//! let app = Router::new()
//!     .route("/protected", get(handler))
//!     .route_layer(api_key);
//! ```
//!
//! On success the layer inserts a [`VerifiedKey`] into the request
//! extensions before calling the inner service.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::{debug, error, warn};

use crate::client::{KeyVerifier, VerifyRequest, VerifyResponse, VerifyResult};
use crate::config::API_ID_ENV;
use crate::metrics;
use crate::response::{self, Decision};

/// Configuration of the API key middleware.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyMiddlewareConfig {
    /// API whose keys are accepted. Falls back to `KEYGATE_API_ID` when `None`.
    pub api_id: Option<String>,
    /// Paths that skip verification (exact match against the URI path).
    pub bypass_paths: Vec<String>,
}

impl ApiKeyMiddlewareConfig {
    pub fn new(api_id: impl Into<String>) -> Self {
        Self {
            api_id: Some(api_id.into()),
            bypass_paths: Vec::new(),
        }
    }

    /// Configuration taking the API id from the environment.
    pub fn from_env() -> Self {
        Self {
            api_id: std::env::var(API_ID_ENV).ok().filter(|v| !v.trim().is_empty()),
            bypass_paths: Vec::new(),
        }
    }

    pub fn with_bypass_paths(mut self, bypass_paths: Vec<String>) -> Self {
        self.bypass_paths = bypass_paths;
        self
    }
}

/// Identity of a successfully verified key, available to handlers as a
/// request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedKey {
    pub key_id: Option<String>,
    pub owner_id: Option<String>,
    pub code: String,
}

impl From<VerifyResult> for VerifiedKey {
    fn from(result: VerifyResult) -> Self {
        Self {
            key_id: result.key_id,
            owner_id: result.owner_id,
            code: result.code,
        }
    }
}

/// Parse the token out of an `Authorization` header value.
///
/// The scheme is matched case-insensitively. The token must be non-empty and
/// contain no whitespace.
pub fn parse_bearer(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }

    Some(token)
}

/// What to do with a request before any remote call.
enum Prepared {
    Bypass,
    Reject(Response<Body>),
    Verify(VerifyRequest),
}

/// API key verification middleware.
///
/// Cheap to clone; clones share the verifier and configuration.
#[derive(Clone)]
pub struct ApiKeyMiddleware {
    config: Arc<ApiKeyMiddlewareConfig>,
    verifier: Arc<dyn KeyVerifier>,
}

/// Create an API key middleware verifying keys with `verifier`.
///
/// When `config.api_id` is `None` the `KEYGATE_API_ID` environment variable
/// is consulted once, here. If that is unset too, verification calls are
/// made without an API id.
pub fn create_api_key_middleware(
    mut config: ApiKeyMiddlewareConfig,
    verifier: Arc<dyn KeyVerifier>,
) -> ApiKeyMiddleware {
    if config.api_id.is_none() {
        config.api_id = ApiKeyMiddlewareConfig::from_env().api_id;
    }

    ApiKeyMiddleware {
        config: Arc::new(config),
        verifier,
    }
}

impl ApiKeyMiddleware {
    /// The API id verification calls are made with.
    pub fn api_id(&self) -> Option<&str> {
        self.config.api_id.as_deref()
    }

    /// Decide whether `req` may proceed.
    pub async fn check(&self, req: &Request<Body>) -> Decision {
        match self.prepare(req) {
            Prepared::Bypass => Decision::Continue,
            Prepared::Reject(response) => Decision::Respond(response),
            Prepared::Verify(request) => match self.verify(request).await {
                Ok(_) => Decision::Continue,
                Err(response) => Decision::Respond(response),
            },
        }
    }

    fn prepare(&self, req: &Request<Body>) -> Prepared {
        let path = req.uri().path();
        if self.config.bypass_paths.iter().any(|p| p == path) {
            debug!(path, "Bypassing API key verification");
            metrics::record_api_key_decision("bypassed");
            return Prepared::Bypass;
        }

        let header = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let Some(header) = header else {
            warn!(path, "Missing authorization header");
            metrics::record_api_key_decision("missing_credential");
            return Prepared::Reject(response::unauthorized("API key required"));
        };

        match parse_bearer(header) {
            Some(token) => Prepared::Verify(VerifyRequest {
                key: token.to_string(),
                api_id: self.config.api_id.clone(),
            }),
            None => {
                warn!(path, "Malformed authorization header");
                metrics::record_api_key_decision("missing_credential");
                Prepared::Reject(response::unauthorized(
                    "Expected 'Authorization: Bearer <key>'",
                ))
            }
        }
    }

    async fn verify(&self, request: VerifyRequest) -> Result<VerifiedKey, Response<Body>> {
        let started = Instant::now();
        let outcome = self.verifier.verify(request).await;
        metrics::record_remote_call_duration("verify_key", started.elapsed().as_secs_f64());

        match outcome {
            Err(e) => {
                error!(error = %e, "Key verification call failed");
                metrics::record_api_key_decision("service_error");
                Err(response::internal_error())
            }
            Ok(VerifyResponse {
                error: Some(service_error),
                ..
            }) => {
                error!(
                    code = %service_error.code,
                    message = %service_error.message,
                    api_id = ?self.config.api_id,
                    "Key service returned an error"
                );
                metrics::record_api_key_decision("service_error");
                Err(response::internal_error())
            }
            Ok(VerifyResponse {
                result: Some(result),
                ..
            }) if result.valid => {
                debug!(key_id = ?result.key_id, "API key verified");
                metrics::record_api_key_decision("allowed");
                Ok(VerifiedKey::from(result))
            }
            Ok(VerifyResponse {
                result: Some(result),
                ..
            }) => {
                warn!(code = %result.code, "Invalid API key provided");
                metrics::record_api_key_decision("invalid");
                let message = if result.code.is_empty() {
                    "Invalid API key".to_string()
                } else {
                    format!("Invalid API key ({})", result.code)
                };
                Err(response::unauthorized(&message))
            }
            Ok(VerifyResponse {
                error: None,
                result: None,
            }) => {
                error!("Key service response carried neither a result nor an error");
                metrics::record_api_key_decision("service_error");
                Err(response::internal_error())
            }
        }
    }
}

impl<S> Layer<S> for ApiKeyMiddleware {
    type Service = ApiKeyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ApiKeyService {
            inner,
            middleware: self.clone(),
        }
    }
}

/// API key verification service wrapper.
#[derive(Clone)]
pub struct ApiKeyService<S> {
    inner: S,
    middleware: ApiKeyMiddleware,
}

impl<S> Service<Request<Body>> for ApiKeyService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let middleware = self.middleware.clone();
        let mut inner = self.inner.clone();
        let prepared = middleware.prepare(&req);

        Box::pin(async move {
            let request = match prepared {
                Prepared::Bypass => return inner.call(req).await,
                Prepared::Reject(response) => return Ok(response),
                Prepared::Verify(request) => request,
            };

            match middleware.verify(request).await {
                Ok(verified) => {
                    req.extensions_mut().insert(verified);
                    inner.call(req).await
                }
                Err(response) => Ok(response),
            }
        })
    }
}
