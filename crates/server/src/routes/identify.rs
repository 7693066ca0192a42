use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use historicam::ClassificationResult;
use serde::Deserialize;
use std::sync::Arc;

/// Multipart field names accepted for the uploaded photo.
const IMAGE_FIELDS: [&str; 2] = ["image", "file"];

/// Query embedding supplied by the caller
#[derive(Debug, Deserialize)]
pub struct EmbeddingQuery {
    pub embedding: Vec<f64>,
}

/// Identify the building in an uploaded photo
///
/// Expects `multipart/form-data` with the photo in an `image` (or `file`)
/// field, or in any field whose content type is `image/*`.
pub async fn identify_image(
    State(state): State<Arc<ServerState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ServerResult<Json<ClassificationResult>> {
    let mut multipart =
        multipart.map_err(|rejection| ServerError::BadRequest(rejection.body_text()))?;
    let limit_mb = state.config.max_body_size_mb;

    let image = loop {
        let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| multipart_error(err, limit_mb))?
        else {
            return Err(ServerError::BadRequest(
                "multipart field 'image' is required".to_string(),
            ));
        };

        let named = field.name().is_some_and(|n| IMAGE_FIELDS.contains(&n));
        let is_image = field
            .content_type()
            .is_some_and(|ct| ct.starts_with("image/"));

        if is_image {
            break field
                .bytes()
                .await
                .map_err(|err| multipart_error(err, limit_mb))?;
        }
        if named {
            return Err(ServerError::BadRequest("File must be an image".to_string()));
        }
    };

    let result = state.service.identify(&image).await?;
    tracing::info!(
        status = %result.status,
        building_id = ?result.building_id,
        confidence = result.confidence,
        bytes = image.len(),
        "identified upload"
    );
    Ok(Json(result))
}

/// Classify a caller-supplied query embedding without calling the provider
pub async fn identify_embedding(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<EmbeddingQuery>, JsonRejection>,
) -> ServerResult<Json<ClassificationResult>> {
    let Json(query) = body.map_err(|rejection| ServerError::BadRequest(rejection.body_text()))?;
    let result = state.service.identify_embedding(&query.embedding).await?;
    Ok(Json(result))
}

fn multipart_error(err: MultipartError, limit_mb: usize) -> ServerError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServerError::PayloadTooLarge(limit_mb)
    } else {
        ServerError::BadRequest(err.body_text())
    }
}
