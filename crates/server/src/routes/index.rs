use crate::state::ServerState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

/// Index statistics response
#[derive(Debug, Serialize)]
pub struct IndexStatsResponse {
    pub backend: &'static str,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buildings: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Get reference index statistics
///
/// Never triggers a lazy load; an unloaded index reports `loaded: false`.
pub async fn index_stats(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let backend = state.service.ranker_name();
    let loaded = state.index.as_ref().and_then(|handle| handle.loaded());

    let response = match loaded {
        Some(index) => IndexStatsResponse {
            backend,
            loaded: true,
            records: Some(index.size()),
            dimension: index.dimension(),
            buildings: Some(index.building_count()),
            source: Some(index.source().to_string()),
        },
        None => IndexStatsResponse {
            backend,
            loaded: false,
            records: None,
            dimension: None,
            buildings: None,
            source: None,
        },
    };
    Json(response)
}
