//! # HistoriCam Matcher (`matcher`)
//!
//! ## Purpose
//!
//! `matcher` turns a query embedding into a building decision. It sits on top
//! of the reference index (`index`) and is shared by the live identification
//! service and the offline evaluation harness, so both score queries the same
//! way.
//!
//! ## Core Types
//!
//! - [`NeighborMatch`]: record id, parsed building id and cosine similarity.
//! - [`SimilarityRanker`]: top-K neighbor source, with two implementations:
//!   - [`ExhaustiveRanker`]: exact brute-force cosine scan over an
//!     in-memory [`index::EmbeddingIndex`] (see [`rank`]).
//!   - `VectorSearchRanker`: a managed Vertex AI vector-search endpoint
//!     (enabled via the `vector-search` feature, on by default).
//! - [`classify`]: thresholded majority vote producing a
//!   [`ClassificationResult`] with status `confident`, `uncertain` or
//!   `no_match`.
//! - [`Thresholds`]: validated confidence/backup cut-offs.
//!
//! ## Example Usage
//!
//! ```
//! use index::{EmbeddingIndex, EmbeddingRecord};
//! use matcher::{classify, rank, MatchStatus};
//!
//! let index = EmbeddingIndex::from_records(vec![
//!     EmbeddingRecord::new("1_a", vec![1.0, 0.0]),
//!     EmbeddingRecord::new("1_b", vec![0.9, 0.1]),
//!     EmbeddingRecord::new("2_a", vec![0.0, 1.0]),
//! ])
//! .unwrap();
//!
//! let matches = rank(&[1.0, 0.05], &index, 3).unwrap();
//! let result = classify(&matches, 0.7, 0.4);
//! assert_eq!(result.status, MatchStatus::Confident);
//! assert_eq!(result.building_id.as_deref(), Some("1"));
//! ```
//!
//! ## Error Handling
//!
//! Ranking returns [`MatchError`]; a query whose length differs from the index
//! dimension is a [`MatchError::DimensionMismatch`], while an empty index is
//! simply an empty match list. Classification never fails: "no match" is a
//! regular outcome.

mod classifier;
mod ranker;
mod types;
#[cfg(feature = "vector-search")]
mod vector_search;

pub use classifier::{
    classify, round3, ClassificationResult, MatchStatus, ScoredMatch, Thresholds,
    NO_MATCH_MESSAGE, NO_NEIGHBORS_MESSAGE, UNCERTAIN_MESSAGE,
};
pub use ranker::{rank, ExhaustiveRanker, SimilarityRanker};
pub use types::{MatchError, NeighborMatch};
#[cfg(feature = "vector-search")]
pub use vector_search::{parse_find_neighbors, VectorSearchConfig, VectorSearchRanker};
