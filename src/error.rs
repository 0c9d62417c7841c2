use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Errors raised while talking to the remote key / ratelimit service.
///
/// The middlewares never surface these to clients. Every variant collapses
/// into the error path of the middleware that made the call (a 500 by
/// default), so the distinction only matters for logs and metrics.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Request to key service failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Key service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode key service response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience type alias for Results with ClientError.
pub type ClientResult<T> = Result<T, ClientError>;

/// Application-level errors for the demo server.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),
}

/// Error response body for API endpoints.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Full details stay server-side
        tracing::error!(error = %self, "Request failed");

        let (status, error_type, message) = match &self {
            AppError::ConfigError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                "Service configuration error. Please contact support.",
            ),
            AppError::Client(_) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "Key service is unavailable. Please try again later.",
            ),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: message.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
