use index::LoadError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One ranked neighbor of a query embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NeighborMatch {
    /// Record id of the matched reference embedding.
    pub id: String,
    /// Building label parsed from `id`.
    pub building_id: String,
    /// Cosine similarity in `[-1, 1]`, higher is closer.
    pub similarity: f64,
}

impl NeighborMatch {
    pub fn new(id: impl Into<String>, similarity: f64) -> Self {
        let id = id.into();
        let building_id = index::building_id_of(&id).to_string();
        Self {
            id,
            building_id,
            similarity,
        }
    }
}

/// Errors produced by ranking and classification.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    /// Query vector length differs from the reference dimension.
    #[error("query dimension {found} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    /// Invalid thresholds or ranker settings.
    #[error("invalid match config: {0}")]
    InvalidConfig(String),
    /// The in-memory reference index could not be loaded.
    #[error("reference index unavailable: {0}")]
    Index(#[from] LoadError),
    /// Remote vector-search endpoint failed or answered garbage.
    #[error("vector search backend error: {0}")]
    Backend(String),
}
