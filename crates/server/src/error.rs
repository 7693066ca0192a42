use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use embed::EmbedError;
use historicam::IdentifyError;
use matcher::MatchError;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub type ServerResult<T> = Result<T, ServerError>;

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payload too large: max {0}MB allowed")]
    PayloadTooLarge(usize),

    #[error("Identification error: {0}")]
    Identify(#[from] IdentifyError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found")]
    NotFound,
}

/// API error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ServerError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Identify(err) => identify_status(err),
            ServerError::Internal(_) | ServerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::Authentication(_) => "AUTH_FAILED",
            ServerError::BadRequest(_) => "BAD_REQUEST",
            ServerError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ServerError::Identify(err) => identify_code(err),
            ServerError::Internal(_) => "INTERNAL_ERROR",
            ServerError::Config(_) => "CONFIG_ERROR",
            ServerError::NotFound => "NOT_FOUND",
        }
    }
}

fn identify_status(err: &IdentifyError) -> StatusCode {
    match err {
        IdentifyError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        IdentifyError::Embedding(EmbedError::InvalidImage(_)) => StatusCode::BAD_REQUEST,
        IdentifyError::Embedding(EmbedError::InvalidConfig(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        IdentifyError::Embedding(_) | IdentifyError::EmbeddingTimeout(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        IdentifyError::Match(MatchError::DimensionMismatch { .. }) => StatusCode::BAD_REQUEST,
        IdentifyError::Match(MatchError::Index(_) | MatchError::Backend(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        IdentifyError::Match(MatchError::InvalidConfig(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn identify_code(err: &IdentifyError) -> &'static str {
    match err {
        IdentifyError::InvalidInput(_) | IdentifyError::Embedding(EmbedError::InvalidImage(_)) => {
            "BAD_REQUEST"
        }
        IdentifyError::Embedding(EmbedError::InvalidConfig(_)) => "CONFIG_ERROR",
        IdentifyError::Embedding(_) => "EMBEDDING_UNAVAILABLE",
        IdentifyError::EmbeddingTimeout(_) => "EMBEDDING_TIMEOUT",
        IdentifyError::Match(MatchError::DimensionMismatch { .. }) => "DIMENSION_MISMATCH",
        IdentifyError::Match(MatchError::Index(_)) => "INDEX_UNAVAILABLE",
        IdentifyError::Match(MatchError::Backend(_)) => "RANKER_UNAVAILABLE",
        IdentifyError::Match(MatchError::InvalidConfig(_)) => "CONFIG_ERROR",
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "request failed");
        }

        let body = Json(json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

impl From<std::net::AddrParseError> for ServerError {
    fn from(err: std::net::AddrParseError) -> Self {
        ServerError::Config(format!("Invalid address: {err}"))
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Internal(format!("IO error: {err}"))
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}
