//! Response shaping shared by both middlewares.
//!
//! Every short-circuit the middlewares produce is built here so the two
//! stay consistent on status codes, bodies and headers.

use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use chrono::Utc;
use serde_json::json;

use crate::client::RatelimitResponse;

/// Default body of the error path.
pub const INTERNAL_SERVER_ERROR_BODY: &str = "Internal server error";

/// Default body of a rejected rate limit check.
pub const TOO_MANY_REQUESTS_BODY: &str = "Rate limit exceeded. Please retry later.";

/// Outcome of a middleware check.
///
/// `Continue` lets the request through to the next handler. `Respond` ends the
/// pipeline with the carried response, which is returned to the client as is.
#[derive(Debug)]
pub enum Decision {
    Continue,
    Respond(Response<Body>),
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_continue(&self) -> bool {
        matches!(self, Decision::Continue)
    }

    /// The short-circuit response, if any.
    pub fn into_option(self) -> Option<Response<Body>> {
        match self {
            Decision::Continue => None,
            Decision::Respond(response) => Some(response),
        }
    }
}

/// Build an unauthorized (401) response.
pub fn unauthorized(message: &str) -> Response<Body> {
    (
        StatusCode::UNAUTHORIZED,
        [("WWW-Authenticate", "Bearer")],
        axum::Json(json!({
            "error": "unauthorized",
            "message": message,
        })),
    )
        .into_response()
}

/// Build the default internal server error (500) response.
pub fn internal_error() -> Response<Body> {
    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_SERVER_ERROR_BODY).into_response()
}

/// Build the default rate limited (429) response from a limiter outcome.
pub fn too_many_requests(outcome: &RatelimitResponse) -> Response<Body> {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [
            ("Retry-After", retry_after_secs(outcome.reset).to_string()),
            ("X-RateLimit-Limit", outcome.limit.to_string()),
            ("X-RateLimit-Remaining", outcome.remaining.to_string()),
            ("X-RateLimit-Reset", outcome.reset.to_string()),
        ],
        TOO_MANY_REQUESTS_BODY,
    )
        .into_response()
}

/// Whole seconds until `reset_ms` (unix epoch millis), never less than 1.
fn retry_after_secs(reset_ms: i64) -> i64 {
    let remaining_ms = reset_ms.saturating_sub(Utc::now().timestamp_millis());
    (remaining_ms.saturating_add(999) / 1000).max(1)
}
