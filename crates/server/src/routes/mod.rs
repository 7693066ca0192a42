//! API route handlers
//!
//! - `health`: liveness, readiness, metrics and server metadata
//! - `identify`: photo and raw-embedding identification
//! - `index`: reference index statistics

pub mod health;
pub mod identify;
pub mod index;

use crate::error::{ServerError, ServerResult};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// API version and base info (GET /, no authentication).
pub async fn api_info() -> ServerResult<impl IntoResponse> {
    Ok(Json(json!({
        "name": "HistoriCam",
        "version": env!("CARGO_PKG_VERSION"),
        "api_version": "v1",
        "endpoints": [
            "/identify",
            "/api/v1/identify",
            "/api/v1/identify/embedding",
            "/api/v1/index/stats",
            "/api/v1/metadata",
            "/health",
            "/ready",
            "/metrics"
        ]
    })))
}

/// 404 Not Found handler
pub async fn not_found() -> ServerError {
    ServerError::NotFound
}
