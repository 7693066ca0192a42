use async_trait::async_trait;
use fxhash::hash64;

use crate::normalize::l2_normalize_in_place;
use crate::{EmbedError, EmbeddingProvider};

/// Deterministic provider for tests and offline runs.
///
/// Generates sinusoid values derived from a hash of the image bytes, so the
/// same bytes always map to the same unit vector.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubEmbeddingProvider;

pub(crate) fn make_stub_embedding(image_bytes: &[u8], dimension: usize) -> Vec<f64> {
    let h = hash64(image_bytes);
    let mut v: Vec<f64> = (0..dimension)
        .map(|idx| ((h >> (idx % 32)) as f64 * 0.0001 + idx as f64).sin())
        .collect();
    l2_normalize_in_place(&mut v);
    v
}

#[async_trait]
impl EmbeddingProvider for StubEmbeddingProvider {
    async fn embed(&self, image_bytes: &[u8], dimension: usize) -> Result<Vec<f64>, EmbedError> {
        if image_bytes.is_empty() {
            return Err(EmbedError::InvalidImage("empty image payload".into()));
        }
        Ok(make_stub_embedding(image_bytes, dimension))
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
