//! End-to-end tests of the demo router.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use keygate::client::{KeyVerifier, LocalRatelimiter, VerifyRequest, VerifyResponse, VerifyResult};
use keygate::error::ClientResult;
use keygate::middleware::{
    ApiKeyMiddlewareConfig, RatelimitMiddlewareConfig, create_api_key_middleware,
    create_ratelimit_middleware,
};
use keygate::routes::ratelimit_config;
use keygate::{AppState, Config, build_router, build_router_with};

struct AcceptAll;

#[async_trait]
impl KeyVerifier for AcceptAll {
    async fn verify(&self, _request: VerifyRequest) -> ClientResult<VerifyResponse> {
        let mut result = VerifyResult::new(true, "VALID");
        result.owner_id = Some("owner_1".to_string());
        Ok(VerifyResponse::from_result(result))
    }
}

fn test_config(limit: u32) -> Config {
    Config {
        ratelimit_limit: limit,
        ratelimit_duration: Duration::from_secs(60),
        ..Config::default()
    }
}

fn app(limit: u32) -> axum::Router {
    let config = test_config(limit);
    let api_key =
        create_api_key_middleware(ApiKeyMiddlewareConfig::new("api_1"), Arc::new(AcceptAll));
    let limits = RatelimitMiddlewareConfig::new(ratelimit_config(&config));
    let limiter = LocalRatelimiter::from_config(&limits.config).unwrap();
    let ratelimit = create_ratelimit_middleware(limits, Arc::new(limiter));
    build_router_with(AppState::new(config), api_key, ratelimit)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_is_open() {
    let response = app(1)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_protected_requires_key() {
    let app = app(5);

    let response = app
        .clone()
        .oneshot(Request::get("/protected").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::get("/protected")
                .header("authorization", "Bearer valid-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["owner_id"], "owner_1");
}

#[tokio::test]
async fn test_limited_rejects_after_quota() {
    let app = app(2);

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(Request::get("/limited").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(Request::get("/limited").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
}

#[tokio::test]
async fn test_echo_is_rate_limited_before_key_check() {
    let app = app(1);
    let echo = |authorization: Option<&str>| {
        let mut builder = Request::post("/api/echo").header("content-type", "application/json");
        if let Some(value) = authorization {
            builder = builder.header("authorization", value);
        }
        builder
            .body(Body::from(json!({"hello": "world"}).to_string()))
            .unwrap()
    };

    let response = app.clone().oneshot(echo(Some("Bearer k"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["payload"], json!({"hello": "world"}));
    assert_eq!(json["owner_id"], "owner_1");

    // Quota is spent, so even a request without a key sees the limiter first
    let response = app.oneshot(echo(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_build_router_from_config() {
    let router = build_router(AppState::new(test_config(3))).unwrap();

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[test]
fn test_build_router_rejects_remote_backend_without_root_key() {
    let config = Config {
        ratelimit_backend: keygate::config::RatelimitBackend::Remote,
        root_key: None,
        ..Config::default()
    };

    assert!(build_router(AppState::new(config)).is_err());
}
