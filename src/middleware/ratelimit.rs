//! Rate limiting middleware backed by a [`Ratelimiter`].
//!
//! # Flow
//!
//! ```text
//! Request ─► identifier ─► limiter.limit(identifier) ─► success ─► continue
//!               │                    │                     │
//!               │ error              │ error               └─► fail ─► on_exceeded | 429
//!               └────────────────────┴─► on_error | 500 "Internal server error"
//! ```
//!
//! If identifier resolution fails the limiter is not called.
//!
//! # Hooks
//!
//! - `get_identifier` - derive the bucket key; defaults to the client IP
//!   (see [`super::ip`])
//! - `on_exceeded` - response for rejected requests; defaults to a 429 with
//!   `Retry-After` and `X-RateLimit-*` headers
//! - `on_error` - response for the error path
//! - `logger` - receives an entry at every decision
//!
//! Hook responses are returned exactly as produced. A panicking hook is
//! contained: `get_identifier` takes the error path, `on_exceeded` and
//! `on_error` fall back to the default 429 and 500.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{Level, debug, error, info, trace, warn};

use super::ip::extract_client_ip;
use crate::client::{HttpRatelimiter, RatelimitConfig, RatelimitResponse, Ratelimiter};
use crate::error::ClientResult;
use crate::metrics;
use crate::response::{self, Decision};

/// Derives the rate limit identifier of a request.
pub type IdentifierFn = Arc<dyn Fn(&Request<Body>) -> anyhow::Result<String> + Send + Sync>;

/// Produces a response for a request.
pub type ResponseFn = Arc<dyn Fn(&Request<Body>) -> Response<Body> + Send + Sync>;

/// Decision points reported to a [`RatelimitLogger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatelimitEvent {
    Allowed,
    Exceeded,
    Errored,
}

/// A single log entry.
#[derive(Debug, Clone)]
pub struct LogEntry<'a> {
    pub level: Level,
    pub event: RatelimitEvent,
    pub identifier: Option<&'a str>,
    pub message: String,
}

/// Sink for rate limit diagnostics.
///
/// A panicking logger is contained; it never changes the response.
pub trait RatelimitLogger: Send + Sync {
    fn log(&self, entry: &LogEntry<'_>);
}

/// Logger forwarding entries to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl RatelimitLogger for TracingLogger {
    fn log(&self, entry: &LogEntry<'_>) {
        let event = entry.event;
        let identifier = entry.identifier.unwrap_or("-");
        let message = entry.message.as_str();
        if entry.level == Level::ERROR {
            error!(?event, identifier, "{message}");
        } else if entry.level == Level::WARN {
            warn!(?event, identifier, "{message}");
        } else if entry.level == Level::INFO {
            info!(?event, identifier, "{message}");
        } else if entry.level == Level::DEBUG {
            debug!(?event, identifier, "{message}");
        } else {
            trace!(?event, identifier, "{message}");
        }
    }
}

/// Configuration of the rate limit middleware.
#[derive(Clone)]
pub struct RatelimitMiddlewareConfig {
    /// Construction parameters of the limiter client. Read by
    /// [`create_ratelimit_middleware_from_config`]; when the limiter is
    /// supplied directly, build it from these with
    /// [`HttpRatelimiter::new`] or [`crate::client::LocalRatelimiter::from_config`].
    pub config: RatelimitConfig,
    get_identifier: Option<IdentifierFn>,
    on_exceeded: Option<ResponseFn>,
    on_error: Option<ResponseFn>,
    logger: Option<Arc<dyn RatelimitLogger>>,
}

impl RatelimitMiddlewareConfig {
    pub fn new(config: RatelimitConfig) -> Self {
        Self {
            config,
            get_identifier: None,
            on_exceeded: None,
            on_error: None,
            logger: None,
        }
    }

    /// Use `f` instead of the client IP as identifier. An `Err` takes the
    /// error path without calling the limiter.
    pub fn with_identifier<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request<Body>) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.get_identifier = Some(Arc::new(f));
        self
    }

    /// Respond with `f` when the limit is exceeded.
    pub fn on_exceeded<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&Request<Body>) -> R + Send + Sync + 'static,
        R: IntoResponse,
    {
        self.on_exceeded = Some(Arc::new(move |req: &Request<Body>| f(req).into_response()));
        self
    }

    /// Respond with `f` when the identifier or the limiter fails.
    pub fn on_error<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&Request<Body>) -> R + Send + Sync + 'static,
        R: IntoResponse,
    {
        self.on_error = Some(Arc::new(move |req: &Request<Body>| f(req).into_response()));
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn RatelimitLogger>) -> Self {
        self.logger = Some(logger);
        self
    }
}

/// Rate limit middleware.
///
/// The limiter client is built once and shared by all clones; it holds no
/// per-request state.
#[derive(Clone)]
pub struct RatelimitMiddleware {
    limiter: Arc<dyn Ratelimiter>,
    get_identifier: Option<IdentifierFn>,
    on_exceeded: Option<ResponseFn>,
    on_error: Option<ResponseFn>,
    logger: Option<Arc<dyn RatelimitLogger>>,
}

/// Create a rate limit middleware deciding with `limiter`.
///
/// `config.config` is not read here, `limiter` already embodies it; see
/// [`create_ratelimit_middleware_from_config`] to build the remote client
/// from it.
pub fn create_ratelimit_middleware(
    config: RatelimitMiddlewareConfig,
    limiter: Arc<dyn Ratelimiter>,
) -> RatelimitMiddleware {
    RatelimitMiddleware {
        limiter,
        get_identifier: config.get_identifier,
        on_exceeded: config.on_exceeded,
        on_error: config.on_error,
        logger: config.logger,
    }
}

/// Create a rate limit middleware backed by the remote service described by
/// `config.config`.
///
/// # Errors
///
/// Returns the client construction error, see [`HttpRatelimiter::new`].
pub fn create_ratelimit_middleware_from_config(
    config: RatelimitMiddlewareConfig,
) -> ClientResult<RatelimitMiddleware> {
    let limiter = HttpRatelimiter::new(&config.config)?;
    info!(
        namespace = %config.config.namespace,
        limit = config.config.limit,
        duration_ms = config.config.duration.as_millis() as u64,
        async_mode = config.config.async_mode,
        "Remote rate limiter configured"
    );
    Ok(create_ratelimit_middleware(config, Arc::new(limiter)))
}

impl RatelimitMiddleware {
    /// Decide whether `req` may proceed.
    pub async fn check(&self, req: &Request<Body>) -> Decision {
        let identifier = match self.identify(req) {
            Ok(identifier) => identifier,
            Err(decision) => return decision,
        };
        let outcome = self.spend(&identifier).await;
        self.decide(req, &identifier, outcome)
    }

    /// Resolve the identifier, or the error path's decision if that fails.
    fn identify(&self, req: &Request<Body>) -> Result<String, Decision> {
        match &self.get_identifier {
            None => Ok(extract_client_ip(req).into_owned()),
            Some(get_identifier) => match catch_unwind(AssertUnwindSafe(|| get_identifier(req))) {
                Ok(Ok(identifier)) => Ok(identifier),
                Ok(Err(e)) => Err(self.errored(
                    req,
                    None,
                    &format!("Failed to resolve identifier: {e:#}"),
                )),
                Err(_) => Err(self.errored(req, None, "Identifier hook panicked")),
            },
        }
    }

    async fn spend(&self, identifier: &str) -> ClientResult<RatelimitResponse> {
        let started = Instant::now();
        let outcome = self.limiter.limit(identifier).await;
        metrics::record_remote_call_duration("ratelimit", started.elapsed().as_secs_f64());
        outcome
    }

    fn decide(
        &self,
        req: &Request<Body>,
        identifier: &str,
        outcome: ClientResult<RatelimitResponse>,
    ) -> Decision {
        match outcome {
            Ok(outcome) if outcome.success => {
                metrics::record_ratelimit_decision("allowed");
                self.log(
                    Level::DEBUG,
                    RatelimitEvent::Allowed,
                    Some(identifier),
                    format!("Request allowed, {} remaining", outcome.remaining),
                );
                Decision::Continue
            }
            Ok(outcome) => {
                metrics::record_ratelimit_decision("exceeded");
                self.log(
                    Level::WARN,
                    RatelimitEvent::Exceeded,
                    Some(identifier),
                    format!(
                        "Rate limit exceeded for {} {}",
                        req.method(),
                        req.uri().path()
                    ),
                );
                let response = match &self.on_exceeded {
                    Some(on_exceeded) => run_hook(on_exceeded, req, "on_exceeded")
                        .unwrap_or_else(|| response::too_many_requests(&outcome)),
                    None => response::too_many_requests(&outcome),
                };
                Decision::Respond(response)
            }
            Err(e) => self.errored(
                req,
                Some(identifier),
                &format!("Rate limit check failed: {e}"),
            ),
        }
    }

    fn errored(&self, req: &Request<Body>, identifier: Option<&str>, message: &str) -> Decision {
        metrics::record_ratelimit_decision("errored");
        self.log(
            Level::ERROR,
            RatelimitEvent::Errored,
            identifier,
            message.to_string(),
        );
        let response = match &self.on_error {
            Some(on_error) => {
                run_hook(on_error, req, "on_error").unwrap_or_else(response::internal_error)
            }
            None => response::internal_error(),
        };
        Decision::Respond(response)
    }

    fn log(&self, level: Level, event: RatelimitEvent, identifier: Option<&str>, message: String) {
        let entry = LogEntry {
            level,
            event,
            identifier,
            message,
        };
        let Some(logger) = &self.logger else {
            TracingLogger.log(&entry);
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| logger.log(&entry))).is_err() {
            warn!(?event, "Rate limit logger panicked, entry dropped");
        }
    }
}

impl<S> Layer<S> for RatelimitMiddleware {
    type Service = RatelimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RatelimitService {
            inner,
            middleware: self.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RatelimitService<S> {
    inner: S,
    middleware: RatelimitMiddleware,
}

impl<S> Service<Request<Body>> for RatelimitService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let middleware = self.middleware.clone();
        let mut inner = self.inner.clone();
        let identified = middleware.identify(&req);

        Box::pin(async move {
            // The request body is not Sync, so it is only borrowed between awaits.
            let identifier = match identified {
                Ok(identifier) => identifier,
                Err(decision) => return Ok(into_response(decision)),
            };
            let outcome = middleware.spend(&identifier).await;

            let decision = middleware.decide(&req, &identifier, outcome);
            match decision {
                Decision::Continue => inner.call(req).await,
                decision => Ok(into_response(decision)),
            }
        })
    }
}

/// Run a response hook; `None` if it panicked.
fn run_hook(
    hook: &ResponseFn,
    req: &Request<Body>,
    name: &'static str,
) -> Option<Response<Body>> {
    match catch_unwind(AssertUnwindSafe(|| hook(req))) {
        Ok(response) => Some(response),
        Err(_) => {
            error!(hook = name, "Rate limit hook panicked, using the default response");
            None
        }
    }
}

fn into_response(decision: Decision) -> Response<Body> {
    decision.into_option().unwrap_or_else(response::internal_error)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingLogger {
        entries: Mutex<Vec<(Level, RatelimitEvent)>>,
    }

    impl RatelimitLogger for RecordingLogger {
        fn log(&self, entry: &LogEntry<'_>) {
            self.entries.lock().unwrap().push((entry.level, entry.event));
        }
    }

    struct PanickingLogger;

    impl RatelimitLogger for PanickingLogger {
        fn log(&self, _entry: &LogEntry<'_>) {
            panic!("logger failure");
        }
    }

    fn middleware_with_logger(logger: Arc<dyn RatelimitLogger>) -> RatelimitMiddleware {
        let config = RatelimitMiddlewareConfig::new(RatelimitConfig::new(
            "ns",
            "root",
            1,
            std::time::Duration::from_secs(60),
        ))
        .with_logger(logger);
        let limiter =
            crate::client::LocalRatelimiter::new(1, std::time::Duration::from_secs(60)).unwrap();
        create_ratelimit_middleware(config, Arc::new(limiter))
    }

    #[test]
    fn test_default_identifier_is_client_ip() {
        let middleware = middleware_with_logger(Arc::new(TracingLogger));
        let req = Request::builder()
            .header("x-forwarded-for", "198.51.100.4")
            .body(Body::empty())
            .unwrap();

        assert_eq!(middleware.identify(&req).unwrap(), "198.51.100.4");
    }

    #[tokio::test]
    async fn test_logger_receives_decisions() {
        let logger = Arc::new(RecordingLogger::default());
        let middleware = middleware_with_logger(logger.clone());
        let req = Request::builder().body(Body::empty()).unwrap();

        assert!(middleware.check(&req).await.is_continue());
        assert!(!middleware.check(&req).await.is_continue());

        let entries = logger.entries.lock().unwrap();
        assert_eq!(
            *entries,
            vec![
                (Level::DEBUG, RatelimitEvent::Allowed),
                (Level::WARN, RatelimitEvent::Exceeded),
            ]
        );
    }

    #[tokio::test]
    async fn test_panicking_logger_does_not_change_response() {
        let middleware = middleware_with_logger(Arc::new(PanickingLogger));
        let req = Request::builder().body(Body::empty()).unwrap();

        assert!(middleware.check(&req).await.is_continue());
        let response = middleware.check(&req).await.into_option().unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::TOO_MANY_REQUESTS);
    }
}
