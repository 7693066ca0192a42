use std::sync::Arc;

use async_trait::async_trait;
use index::{EmbeddingIndex, IndexHandle};
use ndarray::ArrayView1;
use tracing::trace;

use crate::types::{MatchError, NeighborMatch};

/// Source of top-K nearest reference embeddings for a query.
///
/// Implementations must return at most `top_k` matches ordered by descending
/// similarity.
#[async_trait]
pub trait SimilarityRanker: Send + Sync {
    async fn rank(&self, query: &[f64], top_k: usize) -> Result<Vec<NeighborMatch>, MatchError>;

    /// Short backend name for logs and stats.
    fn name(&self) -> &'static str;

    /// Whether the ranker can serve without first doing slow work
    /// (e.g. a pending lazy index load).
    fn is_ready(&self) -> bool {
        true
    }
}

/// Exhaustive cosine scan over every indexed vector.
///
/// Returns `min(top_k, index.size())` matches. Ties keep index order. An empty
/// index yields no matches rather than an error.
pub fn rank(
    query: &[f64],
    index: &EmbeddingIndex,
    top_k: usize,
) -> Result<Vec<NeighborMatch>, MatchError> {
    let Some(dimension) = index.dimension() else {
        return Ok(Vec::new());
    };
    if query.len() != dimension {
        return Err(MatchError::DimensionMismatch {
            expected: dimension,
            found: query.len(),
        });
    }
    if top_k == 0 {
        return Ok(Vec::new());
    }

    let query = ArrayView1::from(query);
    let query_norm = query.dot(&query).sqrt();

    let mut scored: Vec<NeighborMatch> = index
        .records()
        .iter()
        .map(|record| {
            let vector = ArrayView1::from(record.vector.as_slice());
            let norm = vector.dot(&vector).sqrt();
            let similarity = if query_norm == 0.0 || norm == 0.0 {
                0.0
            } else {
                (query.dot(&vector) / (query_norm * norm)).clamp(-1.0, 1.0)
            };
            NeighborMatch {
                id: record.id.clone(),
                building_id: record.building_id.clone(),
                // NaN would sort ahead of every real score.
                similarity: if similarity.is_nan() { 0.0 } else { similarity },
            }
        })
        .collect();

    // `sort_by` is stable, so equal scores stay in index order.
    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    scored.truncate(top_k);
    trace!(candidates = index.size(), returned = scored.len(), "ranked query");
    Ok(scored)
}

/// In-process ranker backed by an [`IndexHandle`].
#[derive(Debug, Clone)]
pub struct ExhaustiveRanker {
    index: Arc<IndexHandle>,
}

impl ExhaustiveRanker {
    pub fn new(index: Arc<IndexHandle>) -> Self {
        Self { index }
    }

    /// Ranker over an index that is already loaded.
    pub fn from_index(index: EmbeddingIndex) -> Self {
        Self::new(Arc::new(IndexHandle::ready(index)))
    }

    pub fn handle(&self) -> &Arc<IndexHandle> {
        &self.index
    }
}

#[async_trait]
impl SimilarityRanker for ExhaustiveRanker {
    async fn rank(&self, query: &[f64], top_k: usize) -> Result<Vec<NeighborMatch>, MatchError> {
        let index = self.index.get().await?;
        rank(query, &index, top_k)
    }

    fn name(&self) -> &'static str {
        "exhaustive"
    }

    fn is_ready(&self) -> bool {
        self.index.is_loaded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use index::EmbeddingRecord;

    fn index_of(records: &[(&str, Vec<f64>)]) -> EmbeddingIndex {
        EmbeddingIndex::from_records(
            records
                .iter()
                .map(|(id, v)| EmbeddingRecord::new(*id, v.clone()))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn self_similarity_ranks_first() {
        let index = index_of(&[
            ("1_a", vec![0.2, 0.9, 0.1]),
            ("2_a", vec![0.9, 0.1, 0.3]),
            ("3_a", vec![-0.5, 0.5, 0.5]),
        ]);
        for record in index.records() {
            let top = rank(&record.vector, &index, 1).unwrap();
            assert_eq!(top[0].id, record.id);
            assert!((top[0].similarity - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn returns_min_of_top_k_and_size() {
        let index = index_of(&[("1_a", vec![1.0, 0.0]), ("2_a", vec![0.0, 1.0])]);
        assert_eq!(rank(&[1.0, 0.0], &index, 5).unwrap().len(), 2);
        assert_eq!(rank(&[1.0, 0.0], &index, 1).unwrap().len(), 1);
    }

    #[test]
    fn results_descend_by_similarity() {
        let index = index_of(&[
            ("1_a", vec![0.0, 1.0]),
            ("2_a", vec![1.0, 0.0]),
            ("3_a", vec![0.7, 0.7]),
        ]);
        let ranked = rank(&[1.0, 0.1], &index, 3).unwrap();
        let ids: Vec<&str> = ranked.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["2_a", "3_a", "1_a"]);
        assert!(ranked.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[test]
    fn ties_keep_index_order() {
        let index = index_of(&[
            ("9_a", vec![1.0, 0.0]),
            ("3_a", vec![2.0, 0.0]),
            ("5_a", vec![0.5, 0.0]),
        ]);
        let ranked = rank(&[1.0, 0.0], &index, 3).unwrap();
        let ids: Vec<&str> = ranked.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["9_a", "3_a", "5_a"]);
    }

    #[test]
    fn scaling_the_query_does_not_change_scores() {
        let index = index_of(&[("1_a", vec![0.3, 0.4]), ("2_a", vec![0.8, -0.1])]);
        let a = rank(&[0.5, 0.5], &index, 2).unwrap();
        let b = rank(&[50.0, 50.0], &index, 2).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.id, y.id);
            assert!((x.similarity - y.similarity).abs() < 1e-12);
        }
    }

    #[test]
    fn orthogonal_query_scores_zero() {
        let index = index_of(&[("1_a", vec![1.0, 0.0, 0.0])]);
        let ranked = rank(&[0.0, 1.0, 0.0], &index, 1).unwrap();
        assert!(ranked[0].similarity.abs() < 1e-12);
    }

    #[test]
    fn zero_vectors_score_zero() {
        let index = index_of(&[("1_a", vec![0.0, 0.0]), ("2_a", vec![1.0, 0.0])]);
        let ranked = rank(&[1.0, 0.0], &index, 2).unwrap();
        assert_eq!(ranked[0].id, "2_a");
        assert_eq!(ranked[1].similarity, 0.0);

        let ranked = rank(&[0.0, 0.0], &index, 2).unwrap();
        assert!(ranked.iter().all(|m| m.similarity == 0.0));
    }

    #[test]
    fn empty_index_is_not_an_error() {
        let index = EmbeddingIndex::from_records(Vec::new()).unwrap();
        assert!(rank(&[1.0, 2.0, 3.0], &index, 5).unwrap().is_empty());
    }

    #[test]
    fn wrong_query_length_is_rejected() {
        let index = index_of(&[("1_a", vec![1.0, 0.0, 0.0])]);
        assert_eq!(
            rank(&[1.0, 0.0], &index, 5).unwrap_err(),
            MatchError::DimensionMismatch {
                expected: 3,
                found: 2
            }
        );
    }

    #[tokio::test]
    async fn exhaustive_ranker_uses_handle() {
        let ranker = ExhaustiveRanker::from_index(index_of(&[
            ("1_a", vec![1.0, 0.0]),
            ("2_a", vec![0.0, 1.0]),
        ]));
        assert!(ranker.is_ready());
        assert_eq!(ranker.name(), "exhaustive");
        let ranked = ranker.rank(&[0.0, 2.0], 1).await.unwrap();
        assert_eq!(ranked[0].building_id, "2");
    }
}
