//! Workspace umbrella crate for HistoriCam landmark identification.
//!
//! This crate stitches the embedding provider (`embed`), the reference index
//! (`index`) and the ranking/classification layer (`matcher`) together so
//! callers can go from raw image bytes to a building decision with a single
//! call:
//!
//! ```no_run
//! use historicam::{build_service, HistoricamConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = HistoricamConfig::load(None)?;
//! let assembled = build_service(&config).await?;
//! let photo = std::fs::read("widener.jpg")?;
//! let result = assembled.service.identify(&photo).await?;
//! println!("{} -> {:?} ({})", result.status, result.building_id, result.confidence);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod evaluate;
mod service;

pub use config::{ConfigLoadError, HistoricamConfig, RankerBackend};
pub use embed::{EmbedConfig, EmbedError, EmbedMode, EmbeddingProvider, StubEmbeddingProvider};
pub use evaluate::{EvaluationMode, EvaluationReport, evaluate};
pub use index::{EmbeddingIndex, EmbeddingRecord, IndexHandle, LoadError};
pub use matcher::{
    ClassificationResult, ExhaustiveRanker, MatchError, MatchStatus, NeighborMatch, ScoredMatch,
    SimilarityRanker, Thresholds, classify, rank,
};
pub use service::{Assembled, IdentificationService, ServiceSettings, StartupError, build_service};

use std::time::Duration;

use thiserror::Error;

/// Per-request identification failures.
///
/// "No match" is not an error; it is a regular [`ClassificationResult`].
#[derive(Debug, Error)]
pub enum IdentifyError {
    /// The request itself is unusable (e.g. empty upload).
    #[error("invalid request: {0}")]
    InvalidInput(String),
    /// The embedding provider failed. Surfaced as-is, never retried.
    #[error("embedding generation failed: {0}")]
    Embedding(#[from] EmbedError),
    /// The provider did not answer within the configured timeout.
    #[error("embedding generation timed out after {0:?}")]
    EmbeddingTimeout(Duration),
    /// Ranking failed: dimension mismatch, index unavailable or backend error.
    #[error(transparent)]
    Match(#[from] MatchError),
}

/// Metrics observer for identification requests.
///
/// Implementations are injected into [`IdentificationService`]; the service
/// never reaches for a global recorder.
pub trait IdentifyMetrics: Send + Sync {
    /// One provider call finished (successfully or not).
    fn record_embedding(&self, latency: Duration, ok: bool);
    /// A request reached a classification decision.
    fn record_decision(&self, latency: Duration, status: MatchStatus);
}
