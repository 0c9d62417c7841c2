//! Rate limit middleware tests with fake and in-process limiters.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use axum::routing::get;
use chrono::Utc;
use tower::ServiceExt;

use keygate::ClientError;
use keygate::client::{LocalRatelimiter, RatelimitConfig, RatelimitResponse, Ratelimiter};
use keygate::error::ClientResult;
use keygate::middleware::{
    LogEntry, RatelimitEvent, RatelimitLogger, RatelimitMiddleware, RatelimitMiddlewareConfig,
    create_ratelimit_middleware,
};

/// Limiter answering with a fixed outcome and recording identifiers.
struct FakeLimiter {
    outcome: Option<bool>,
    identifiers: Mutex<Vec<String>>,
}

impl FakeLimiter {
    fn allowing() -> Arc<Self> {
        Self::with(Some(true))
    }

    fn rejecting() -> Arc<Self> {
        Self::with(Some(false))
    }

    fn failing() -> Arc<Self> {
        Self::with(None)
    }

    fn with(outcome: Option<bool>) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            identifiers: Mutex::new(Vec::new()),
        })
    }

    fn identifiers(&self) -> Vec<String> {
        self.identifiers.lock().unwrap().clone()
    }
}

#[async_trait]
impl Ratelimiter for FakeLimiter {
    async fn limit(&self, identifier: &str) -> ClientResult<RatelimitResponse> {
        self.identifiers.lock().unwrap().push(identifier.to_string());
        match self.outcome {
            Some(success) => Ok(RatelimitResponse {
                success,
                limit: 10,
                remaining: if success { 9 } else { 0 },
                reset: Utc::now().timestamp_millis() + 30_000,
            }),
            None => Err(ClientError::Status {
                status: 500,
                body: "boom".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct RecordingLogger {
    events: Mutex<Vec<RatelimitEvent>>,
}

impl RatelimitLogger for RecordingLogger {
    fn log(&self, entry: &LogEntry<'_>) {
        self.events.lock().unwrap().push(entry.event);
    }
}

fn config() -> RatelimitMiddlewareConfig {
    RatelimitMiddlewareConfig::new(RatelimitConfig::new(
        "test",
        "root_key",
        10,
        Duration::from_secs(60),
    ))
}

fn app(middleware: RatelimitMiddleware) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route_layer(middleware)
}

fn request() -> Request<Body> {
    Request::builder()
        .uri("/")
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::empty())
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_success_passes_through() {
    let limiter = FakeLimiter::allowing();
    let app = app(create_ratelimit_middleware(config(), limiter.clone()));

    let response = app.oneshot(request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ok");
    assert_eq!(limiter.identifiers(), vec!["203.0.113.7".to_string()]);
}

#[tokio::test]
async fn test_exceeded_defaults_to_429_with_headers() {
    let app = app(create_ratelimit_middleware(config(), FakeLimiter::rejecting()));

    let response = app.oneshot(request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let headers = response.headers();
    assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "10");
    assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
    let retry_after: i64 = headers
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=30).contains(&retry_after));
}

#[tokio::test]
async fn test_on_exceeded_overrides_response() {
    let config = config().on_exceeded(|_req: &Request<Body>| {
        (StatusCode::SERVICE_UNAVAILABLE, "Slow down")
    });
    let app = app(create_ratelimit_middleware(config, FakeLimiter::rejecting()));

    let response = app.oneshot(request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_string(response).await, "Slow down");
}

#[tokio::test]
async fn test_limiter_error_defaults_to_500() {
    let app = app(create_ratelimit_middleware(config(), FakeLimiter::failing()));

    let response = app.oneshot(request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, "Internal server error");
}

#[tokio::test]
async fn test_on_error_overrides_limiter_error() {
    let config =
        config().on_error(|_req: &Request<Body>| (StatusCode::BAD_GATEWAY, "Limiter down"));
    let app = app(create_ratelimit_middleware(config, FakeLimiter::failing()));

    let response = app.oneshot(request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_string(response).await, "Limiter down");
}

#[tokio::test]
async fn test_identifier_failure_runs_on_error_once_without_limiter() {
    let limiter = FakeLimiter::allowing();
    let on_error_calls = Arc::new(AtomicUsize::new(0));
    let counter = on_error_calls.clone();
    let logger = Arc::new(RecordingLogger::default());

    let config = config()
        .with_identifier(|_req: &Request<Body>| Err(anyhow!("no identifier")))
        .on_error(move |_req: &Request<Body>| {
            counter.fetch_add(1, Ordering::SeqCst);
            (StatusCode::NOT_IMPLEMENTED, "Not implemented")
        })
        .with_logger(logger.clone());
    let app = app(create_ratelimit_middleware(config, limiter.clone()));

    let response = app.oneshot(request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body_string(response).await, "Not implemented");
    assert!(limiter.identifiers().is_empty());
    assert_eq!(on_error_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*logger.events.lock().unwrap(), vec![RatelimitEvent::Errored]);
}

#[tokio::test]
async fn test_identifier_failure_defaults_to_500() {
    let limiter = FakeLimiter::allowing();
    let config = config().with_identifier(|_req: &Request<Body>| Err(anyhow!("no identifier")));
    let app = app(create_ratelimit_middleware(config, limiter.clone()));

    let response = app.oneshot(request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, "Internal server error");
    assert!(limiter.identifiers().is_empty());
}

#[tokio::test]
async fn test_custom_identifier_is_passed_to_limiter() {
    let limiter = FakeLimiter::allowing();
    let config = config().with_identifier(|req: &Request<Body>| {
        req.headers()
            .get("x-tenant")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("missing tenant"))
    });
    let app = app(create_ratelimit_middleware(config, limiter.clone()));

    let req = Request::builder()
        .uri("/")
        .header("x-tenant", "acme")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(limiter.identifiers(), vec!["acme".to_string()]);
}

#[tokio::test]
async fn test_exhausted_identifier_is_rejected() {
    let limiter = Arc::new(LocalRatelimiter::new(1, Duration::from_secs(60)).unwrap());
    let config = config().with_identifier(|_req: &Request<Body>| Ok("shared".to_string()));
    let middleware = create_ratelimit_middleware(config, limiter);

    let first = app(middleware.clone()).oneshot(request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app(middleware).oneshot(request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_identifiers_have_separate_quotas() {
    let limiter = Arc::new(LocalRatelimiter::new(1, Duration::from_secs(60)).unwrap());
    let middleware = create_ratelimit_middleware(config(), limiter.clone());

    for ip in ["198.51.100.1", "198.51.100.2"] {
        let req = Request::builder()
            .uri("/")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap();
        let response = app(middleware.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{ip}");
    }
    assert_eq!(limiter.tracked_identifiers(), 2);
}

#[tokio::test]
async fn test_panicking_identifier_takes_error_path() {
    let limiter = FakeLimiter::allowing();
    let config = config().with_identifier(|_req: &Request<Body>| -> anyhow::Result<String> {
        panic!("identifier hook failed")
    });
    let app = app(create_ratelimit_middleware(config, limiter.clone()));

    let response = tokio::spawn(app.oneshot(request())).await.unwrap().unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, "Internal server error");
    assert!(limiter.identifiers().is_empty());
}

#[tokio::test]
async fn test_panicking_identifier_still_runs_on_error() {
    let config = config()
        .with_identifier(|_req: &Request<Body>| -> anyhow::Result<String> {
            panic!("identifier hook failed")
        })
        .on_error(|_req: &Request<Body>| (StatusCode::NOT_IMPLEMENTED, "Not implemented"));
    let app = app(create_ratelimit_middleware(config, FakeLimiter::allowing()));

    let response = app.oneshot(request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body_string(response).await, "Not implemented");
}

#[tokio::test]
async fn test_panicking_on_exceeded_falls_back_to_429() {
    let config = config().on_exceeded(|_req: &Request<Body>| -> &'static str {
        panic!("on_exceeded failed")
    });
    let app = app(create_ratelimit_middleware(config, FakeLimiter::rejecting()));

    let response = app.oneshot(request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_panicking_on_error_falls_back_to_500() {
    let config = config().on_error(|_req: &Request<Body>| -> &'static str {
        panic!("on_error failed")
    });
    let app = app(create_ratelimit_middleware(config, FakeLimiter::failing()));

    let response = app.oneshot(request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, "Internal server error");
}
