use crate::error::{ServerError, ServerResult};
use crate::state::{ServerMetadata, ServerState};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use std::time::SystemTime;

/// Global server start time for uptime calculation
static SERVER_START_TIME: once_cell::sync::Lazy<SystemTime> =
    once_cell::sync::Lazy::new(SystemTime::now);

fn uptime_seconds() -> u64 {
    SERVER_START_TIME
        .elapsed()
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Health check endpoint (liveness)
/// Returns 200 if server is running
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "historicam-server",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds(),
    }))
}

/// Readiness check endpoint
///
/// A lazily loaded index reports `pending` until the first identification
/// loads it; the server still accepts traffic in that state.
pub async fn readiness_check(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let index_status = match &state.index {
        Some(handle) if handle.is_loaded() => "ready",
        Some(_) => "pending",
        None => "remote",
    };

    Json(json!({
        "status": "ready",
        "service": "historicam-server",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds(),
        "components": {
            "api": "ready",
            "embedding": state.service.provider_name(),
            "ranker": state.service.ranker_name(),
            "index": index_status,
        }
    }))
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<Arc<ServerState>>) -> ServerResult<impl IntoResponse> {
    let handle = state.prometheus.as_ref().ok_or(ServerError::NotFound)?;
    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}

/// Server metadata endpoint (authenticated)
pub async fn server_metadata(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let settings = state.service.settings();
    Json(ServerMetadata {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime_seconds(),
        provider: state.service.provider_name(),
        ranker: state.service.ranker_name(),
        dimension: settings.dimension,
        top_k: settings.top_k,
        confidence_threshold: settings.thresholds.confidence,
        backup_threshold: settings.thresholds.backup,
    })
}
