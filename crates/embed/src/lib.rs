//! # HistoriCam Embed
//!
//! Image embedding providers used to turn a photo into a query vector.
//!
//! ## Providers
//!
//! - [`VertexEmbeddingProvider`]: calls the Vertex AI multimodal embedding
//!   model. Oversized uploads are first shrunk by [`prepare_image`] so they
//!   fit the model's request limits.
//! - [`StubEmbeddingProvider`]: deterministic hash-based vectors for tests
//!   and offline runs.
//!
//! Both implement [`EmbeddingProvider`]. Providers are plain values: the
//! caller builds one (see [`build_provider`]) and injects it wherever it is
//! needed. There is no process-wide client.
//!
//! ## Example
//!
//! ```
//! use embed::{build_provider, EmbedConfig};
//!
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! let provider = build_provider(&EmbedConfig::stub()).unwrap();
//! let v = rt.block_on(provider.embed(b"fake image bytes", 128)).unwrap();
//! assert_eq!(v.len(), 128);
//! ```
//!
//! Provider failures are returned as [`EmbedError`] and never retried here;
//! the caller decides what to tell its client.

mod config;
mod error;
mod normalize;
mod preprocess;
mod stub;
mod vertex;

use std::sync::Arc;

use async_trait::async_trait;

pub use config::{validate_dimension, EmbedConfig, EmbedMode, SUPPORTED_DIMENSIONS};
pub use error::EmbedError;
pub use preprocess::{prepare_image, PreprocessConfig};
pub use stub::StubEmbeddingProvider;
pub use vertex::VertexEmbeddingProvider;

/// Anything that can map raw image bytes to a fixed-size embedding.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `image_bytes`, returning exactly `dimension` values.
    async fn embed(&self, image_bytes: &[u8], dimension: usize) -> Result<Vec<f64>, EmbedError>;

    fn name(&self) -> &'static str;
}

/// Build the provider selected by `cfg.mode`.
pub fn build_provider(cfg: &EmbedConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbedError> {
    cfg.validate()?;
    match cfg.mode {
        EmbedMode::Vertex => Ok(Arc::new(VertexEmbeddingProvider::new(cfg)?)),
        EmbedMode::Stub => Ok(Arc::new(StubEmbeddingProvider)),
    }
}
