use serde::{Deserialize, Serialize};

/// One labelled reference embedding.
///
/// Record ids follow the `"<building_id>_<image_hash>"` convention used by the
/// embedding generation job, so the building label is always recoverable from
/// the id alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Unique record id (`"<building_id>_<image_hash>"`).
    pub id: String,
    /// Raw embedding as stored in the source, not normalized.
    pub vector: Vec<f64>,
    /// Building label derived from `id`.
    pub building_id: String,
}

impl EmbeddingRecord {
    /// Build a record, deriving `building_id` from `id`.
    pub fn new(id: impl Into<String>, vector: Vec<f64>) -> Self {
        let id = id.into();
        let building_id = building_id_of(&id).to_string();
        Self {
            id,
            vector,
            building_id,
        }
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// Extract the building label from a record id.
///
/// Splits on the first underscore; an id without one is its own building id.
pub fn building_id_of(id: &str) -> &str {
    id.split_once('_').map(|(building, _)| building).unwrap_or(id)
}

/// Wire shape of a single NDJSON line. Fields other than `id` and
/// `embedding` (`restricts`, `numeric_restricts`, ...) are ignored.
#[derive(Debug, Deserialize)]
pub(crate) struct SourceLine {
    pub id: String,
    pub embedding: Vec<f64>,
}
