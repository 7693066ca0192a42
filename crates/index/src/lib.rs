//! # HistoriCam Index
//!
//! Reference set of labelled building embeddings that every identification
//! request is scored against.
//!
//! ## Core Features
//!
//! - **Immutable after load**: an [`EmbeddingIndex`] is built once from a
//!   newline-delimited JSON record set and never mutated. A new index version
//!   means a full reload from a new source path.
//! - **Pluggable sources**: records are read through the [`BlobStore`] trait.
//!   Out of the box it provides:
//!   - [`LocalBlobStore`] for files on disk (tests, local runs).
//!   - [`GcsBlobStore`] for `gs://bucket/object` paths (enabled via the
//!     `source-gcs` feature, on by default).
//! - **All-or-nothing loading**: a malformed line or a vector whose dimension
//!   disagrees with the rest aborts the whole load. A partially loaded index
//!   would silently under-represent a building.
//! - **Guarded lazy loading**: [`IndexHandle`] either wraps an index loaded at
//!   startup or loads it exactly once on first use, no matter how many
//!   requests race for it.
//!
//! ## Source format
//!
//! ```text
//! {"id": "12_3f9a", "embedding": [0.012, -0.33, ...], "restricts": [...]}
//! {"id": "12_77c0", "embedding": [0.101, -0.02, ...], "restricts": [...]}
//! ```
//!
//! Only `id` and `embedding` are read; the building label is the part of the
//! id before the first underscore.
//!
//! ## Example Usage
//!
//! ```
//! use index::EmbeddingIndex;
//!
//! let text = "{\"id\":\"1_a\",\"embedding\":[1.0,0.0]}\n{\"id\":\"2_b\",\"embedding\":[0.0,1.0]}\n";
//! let index = EmbeddingIndex::parse(text, "inline", Some(2)).unwrap();
//! assert_eq!(index.size(), 2);
//! assert_eq!(index.dimension(), Some(2));
//! for (id, vector) in index.iter() {
//!     assert_eq!(vector.len(), 2);
//!     assert!(id.contains('_'));
//! }
//! ```

mod handle;
mod record;
mod source;

pub use handle::IndexHandle;
pub use record::{building_id_of, EmbeddingRecord};
#[cfg(feature = "source-gcs")]
pub use source::GcsBlobStore;
pub use source::{blob_store_for, BlobStore, LocalBlobStore};

use hashbrown::{HashMap, HashSet};
use log::{debug, info, warn};
use thiserror::Error;

use crate::record::SourceLine;

/// Errors raised while locating or parsing an embedding record set.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("embedding source not found: {0}")]
    SourceNotFound(String),
    #[error("embedding source unreachable: {0}")]
    Source(String),
    #[error("invalid source path: {0}")]
    InvalidPath(String),
    #[error("malformed record on line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("dimension mismatch on line {line}: expected {expected}, found {found}")]
    DimensionMismatch {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("embedding source {0} contains no records")]
    Empty(String),
}

impl LoadError {
    pub fn source<E: std::fmt::Display>(err: E) -> Self {
        Self::Source(err.to_string())
    }
}

/// In-memory reference index: record id -> fixed-dimension vector.
///
/// Records keep the order in which they appeared in the source, which is the
/// iteration order rankers rely on for tie-breaking.
#[derive(Debug, Clone)]
pub struct EmbeddingIndex {
    records: Vec<EmbeddingRecord>,
    positions: HashMap<String, usize>,
    dimension: Option<usize>,
    source: String,
}

impl EmbeddingIndex {
    /// Fetch `path` from `store` and parse it.
    ///
    /// `expected_dimension`, when set, must match every record.
    pub async fn load(
        store: &dyn BlobStore,
        path: &str,
        expected_dimension: Option<usize>,
    ) -> Result<Self, LoadError> {
        if !store.exists(path).await? {
            return Err(LoadError::SourceNotFound(path.to_string()));
        }
        info!("loading embeddings from {path}");
        let text = store.download_text(path).await?;
        let index = Self::parse(&text, path, expected_dimension)?;
        info!(
            "loaded {} embeddings ({} buildings, dimension {:?}) from {path}",
            index.size(),
            index.building_count(),
            index.dimension
        );
        Ok(index)
    }

    /// Parse an NDJSON record set. Blank lines are skipped; any other line
    /// that fails to parse aborts the load.
    pub fn parse(
        text: &str,
        source: &str,
        expected_dimension: Option<usize>,
    ) -> Result<Self, LoadError> {
        let mut builder = IndexBuilder::new(source, expected_dimension);
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let parsed: SourceLine =
                serde_json::from_str(trimmed).map_err(|err| LoadError::Malformed {
                    line,
                    reason: err.to_string(),
                })?;
            builder.push(line, EmbeddingRecord::new(parsed.id, parsed.embedding))?;
        }
        if builder.records.is_empty() {
            return Err(LoadError::Empty(source.to_string()));
        }
        Ok(builder.finish())
    }

    /// Build an index from records already in memory. An empty record list
    /// yields an empty index.
    pub fn from_records(records: Vec<EmbeddingRecord>) -> Result<Self, LoadError> {
        let mut builder = IndexBuilder::new("memory", None);
        for (idx, record) in records.into_iter().enumerate() {
            builder.push(idx + 1, record)?;
        }
        Ok(builder.finish())
    }

    /// Number of indexed vectors.
    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Shared vector dimension; `None` only for an empty index.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Where the records were read from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Lazily walk `(id, vector)` pairs in source order. Calling it again
    /// starts over from the in-memory records.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> + '_ {
        self.records
            .iter()
            .map(|rec| (rec.id.as_str(), rec.vector.as_slice()))
    }

    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&EmbeddingRecord> {
        self.positions.get(id).map(|&pos| &self.records[pos])
    }

    /// Number of distinct building labels.
    pub fn building_count(&self) -> usize {
        self.records
            .iter()
            .map(|rec| rec.building_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Build a new index holding only the records `keep` accepts. The
    /// receiver is left untouched.
    pub fn filtered<F>(&self, mut keep: F) -> EmbeddingIndex
    where
        F: FnMut(&EmbeddingRecord) -> bool,
    {
        let records: Vec<EmbeddingRecord> =
            self.records.iter().filter(|rec| keep(rec)).cloned().collect();
        let positions = records
            .iter()
            .enumerate()
            .map(|(pos, rec)| (rec.id.clone(), pos))
            .collect();
        let dimension = if records.is_empty() {
            None
        } else {
            self.dimension
        };
        EmbeddingIndex {
            records,
            positions,
            dimension,
            source: self.source.clone(),
        }
    }
}

struct IndexBuilder {
    records: Vec<EmbeddingRecord>,
    positions: HashMap<String, usize>,
    dimension: Option<usize>,
    source: String,
}

impl IndexBuilder {
    fn new(source: &str, expected_dimension: Option<usize>) -> Self {
        Self {
            records: Vec::new(),
            positions: HashMap::new(),
            dimension: expected_dimension,
            source: source.to_string(),
        }
    }

    fn push(&mut self, line: usize, record: EmbeddingRecord) -> Result<(), LoadError> {
        if record.id.is_empty() {
            return Err(LoadError::Malformed {
                line,
                reason: "empty id".into(),
            });
        }
        if record.vector.is_empty() {
            return Err(LoadError::Malformed {
                line,
                reason: format!("record {} has an empty embedding", record.id),
            });
        }
        match self.dimension {
            Some(expected) if expected != record.dimension() => {
                return Err(LoadError::DimensionMismatch {
                    line,
                    expected,
                    found: record.dimension(),
                });
            }
            Some(_) => {}
            None => self.dimension = Some(record.dimension()),
        }

        // Same id twice: the later vector wins, the first position is kept.
        if let Some(&pos) = self.positions.get(&record.id) {
            warn!("duplicate embedding id {} on line {line}; replacing", record.id);
            self.records[pos] = record;
            return Ok(());
        }
        debug!("indexed {} (building {})", record.id, record.building_id);
        self.positions.insert(record.id.clone(), self.records.len());
        self.records.push(record);
        Ok(())
    }

    fn finish(self) -> EmbeddingIndex {
        let dimension = if self.records.is_empty() {
            None
        } else {
            self.dimension
        };
        EmbeddingIndex {
            records: self.records,
            positions: self.positions,
            dimension,
            source: self.source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: &str, embedding: &[f64]) -> String {
        serde_json::json!({ "id": id, "embedding": embedding, "restricts": [] }).to_string()
    }

    #[test]
    fn parse_builds_ordered_index() {
        let text = [
            line("1_a", &[1.0, 0.0, 0.0]),
            line("1_b", &[0.9, 0.1, 0.0]),
            line("2_a", &[0.0, 1.0, 0.0]),
        ]
        .join("\n");

        let index = EmbeddingIndex::parse(&text, "inline", None).unwrap();
        assert_eq!(index.size(), 3);
        assert_eq!(index.dimension(), Some(3));
        assert_eq!(index.building_count(), 2);
        let ids: Vec<&str> = index.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["1_a", "1_b", "2_a"]);
        assert_eq!(index.get("2_a").unwrap().building_id, "2");
    }

    #[test]
    fn iteration_is_restartable() {
        let text = [line("1_a", &[1.0]), line("2_a", &[2.0])].join("\n");
        let index = EmbeddingIndex::parse(&text, "inline", None).unwrap();
        let first: Vec<_> = index.iter().collect();
        let second: Vec<_> = index.iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let text = format!("\n{}\n\n{}\n\n", line("1_a", &[1.0]), line("1_b", &[2.0]));
        let index = EmbeddingIndex::parse(&text, "inline", None).unwrap();
        assert_eq!(index.size(), 2);
    }

    #[test]
    fn malformed_line_aborts_load() {
        let text = format!("{}\n{{not json\n{}", line("1_a", &[1.0]), line("1_b", &[2.0]));
        let err = EmbeddingIndex::parse(&text, "inline", None).unwrap_err();
        assert!(matches!(err, LoadError::Malformed { line: 2, .. }));
    }

    #[test]
    fn missing_embedding_field_is_malformed() {
        let err = EmbeddingIndex::parse(r#"{"id":"1_a"}"#, "inline", None).unwrap_err();
        assert!(matches!(err, LoadError::Malformed { line: 1, .. }));
    }

    #[test]
    fn empty_vector_is_malformed() {
        let err = EmbeddingIndex::parse(&line("1_a", &[]), "inline", None).unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));
    }

    #[test]
    fn mixed_dimensions_abort_load() {
        let text = [line("1_a", &[1.0, 0.0]), line("1_b", &[1.0, 0.0, 0.0])].join("\n");
        let err = EmbeddingIndex::parse(&text, "inline", None).unwrap_err();
        assert_eq!(
            err,
            LoadError::DimensionMismatch {
                line: 2,
                expected: 2,
                found: 3
            }
        );
    }

    #[test]
    fn expected_dimension_is_enforced() {
        let err = EmbeddingIndex::parse(&line("1_a", &[1.0, 0.0]), "inline", Some(512)).unwrap_err();
        assert!(matches!(
            err,
            LoadError::DimensionMismatch {
                expected: 512,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn empty_source_is_an_error() {
        let err = EmbeddingIndex::parse("\n\n", "gs://bucket/empty.jsonl", None).unwrap_err();
        assert_eq!(err, LoadError::Empty("gs://bucket/empty.jsonl".into()));
    }

    #[test]
    fn duplicate_id_keeps_position_and_takes_latest_vector() {
        let text = [
            line("1_a", &[1.0, 0.0]),
            line("2_a", &[0.0, 1.0]),
            line("1_a", &[0.5, 0.5]),
        ]
        .join("\n");
        let index = EmbeddingIndex::parse(&text, "inline", None).unwrap();
        assert_eq!(index.size(), 2);
        assert_eq!(index.records()[0].vector, vec![0.5, 0.5]);
        assert_eq!(index.records()[1].id, "2_a");
    }

    #[test]
    fn from_records_allows_empty_index() {
        let index = EmbeddingIndex::from_records(Vec::new()).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.dimension(), None);
        assert_eq!(index.iter().count(), 0);
    }

    #[test]
    fn filtered_returns_new_index() {
        let index = EmbeddingIndex::from_records(vec![
            EmbeddingRecord::new("1_a", vec![1.0]),
            EmbeddingRecord::new("2_a", vec![2.0]),
            EmbeddingRecord::new("1_b", vec![3.0]),
        ])
        .unwrap();

        let only_one = index.filtered(|rec| rec.building_id == "1");
        assert_eq!(only_one.size(), 2);
        assert!(only_one.get("2_a").is_none());
        assert_eq!(only_one.get("1_b").unwrap().vector, vec![3.0]);
        assert_eq!(index.size(), 3);

        let none = index.filtered(|_| false);
        assert_eq!(none.dimension(), None);
    }
}
