use crate::error::ServerError;
use crate::state::ServerState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request id attached to request extensions by [`request_id`].
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// API key authentication middleware. A no-op when no keys are configured.
pub async fn api_key_auth(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    if !state.config.auth_enabled() {
        return Ok(next.run(request).await);
    }

    // "X-API-Key: <key>" or "Authorization: Bearer <key>"
    let api_key = request
        .headers()
        .get("x-api-key")
        .or_else(|| request.headers().get(AUTHORIZATION))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.strip_prefix("Bearer ").unwrap_or(s).trim().to_string());

    match api_key {
        Some(key) if state.is_valid_api_key(&key) => Ok(next.run(request).await),
        Some(_) => Err(ServerError::Authentication("Invalid API key".to_string())),
        None => Err(ServerError::Authentication(
            "API key required. Provide it in 'X-API-Key' or 'Authorization: Bearer <key>' header"
                .to_string(),
        )),
    }
}

/// Request ID injection middleware
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let incoming = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .filter(|v| !v.is_empty())
        .cloned();
    let header = match incoming {
        Some(value) => value,
        None => generated_request_id(),
    };
    let id = header.to_str().unwrap_or_default().to_string();

    request.extensions_mut().insert(RequestId(id));

    let mut response = next.run(request).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, header);
    response
}

fn generated_request_id() -> HeaderValue {
    // A hyphenated v4 uuid is always a valid header value.
    HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
}

/// Logging middleware
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    tracing::debug!(
        method = %method,
        uri = %uri,
        request_id = %request_id,
        "Request started"
    );

    let response = next.run(request).await;
    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status,
        duration_ms = %duration.as_millis(),
        request_id = %request_id,
        "Request completed"
    );

    response
}
