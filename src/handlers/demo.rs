//! Sample handlers sitting behind the middlewares.

use axum::Json;
use axum::extract::Extension;
use serde_json::{Value, json};
use tracing::debug;

use crate::middleware::VerifiedKey;

/// `GET /protected` - requires a valid API key.
pub async fn protected(key: Option<Extension<VerifiedKey>>) -> Json<Value> {
    let (key_id, owner_id) = match key {
        Some(Extension(key)) => (key.key_id, key.owner_id),
        None => (None, None),
    };

    Json(json!({
        "message": "Access granted",
        "key_id": key_id,
        "owner_id": owner_id,
    }))
}

/// `GET /limited` - rate limited.
pub async fn limited() -> Json<Value> {
    Json(json!({ "message": "Within rate limit" }))
}

/// `POST /api/echo` - rate limited and requires a valid API key.
pub async fn echo(key: Option<Extension<VerifiedKey>>, Json(payload): Json<Value>) -> Json<Value> {
    let owner_id = key.and_then(|Extension(key)| key.owner_id);
    debug!(owner_id = ?owner_id, "Echoing payload");

    Json(json!({
        "owner_id": owner_id,
        "payload": payload,
    }))
}
