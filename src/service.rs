use std::sync::Arc;
use std::time::{Duration, Instant};

use embed::{EmbedError, EmbeddingProvider};
use index::{BlobStore, EmbeddingIndex, IndexHandle, LoadError};
use matcher::{
    ClassificationResult, ExhaustiveRanker, MatchError, SimilarityRanker, Thresholds,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigLoadError, HistoricamConfig, RankerBackend};
use crate::{IdentifyError, IdentifyMetrics};

/// Tunables of a running service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceSettings {
    /// Dimension requested from the provider; must match the reference set.
    pub dimension: usize,
    pub top_k: usize,
    pub thresholds: Thresholds,
    /// Upper bound on one provider call.
    pub embed_timeout: Duration,
}

impl ServiceSettings {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            top_k: 5,
            thresholds: Thresholds::default(),
            embed_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(cfg: &HistoricamConfig) -> Self {
        Self {
            dimension: cfg.index.dimension,
            top_k: cfg.ranker.top_k,
            thresholds: cfg.classifier,
            embed_timeout: Duration::from_secs(cfg.embedding.timeout_secs),
        }
    }

    fn validate(&self) -> Result<(), MatchError> {
        if self.dimension == 0 {
            return Err(MatchError::InvalidConfig("dimension must be greater than zero".into()));
        }
        if self.top_k == 0 {
            return Err(MatchError::InvalidConfig("top_k must be at least 1".into()));
        }
        if self.embed_timeout.is_zero() {
            return Err(MatchError::InvalidConfig("embed timeout must be non-zero".into()));
        }
        self.thresholds.validate()
    }
}

/// Image → building decision.
///
/// Holds no per-request state; one instance serves any number of concurrent
/// requests.
pub struct IdentificationService {
    provider: Arc<dyn EmbeddingProvider>,
    ranker: Arc<dyn SimilarityRanker>,
    settings: ServiceSettings,
    metrics: Option<Arc<dyn IdentifyMetrics>>,
}

impl IdentificationService {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        ranker: Arc<dyn SimilarityRanker>,
        settings: ServiceSettings,
    ) -> Result<Self, MatchError> {
        settings.validate()?;
        Ok(Self {
            provider,
            ranker,
            settings,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn IdentifyMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn ranker_name(&self) -> &'static str {
        self.ranker.name()
    }

    /// Whether the ranker can answer without a pending index load.
    pub fn is_ready(&self) -> bool {
        self.ranker.is_ready()
    }

    /// Embed `image_bytes`, rank against the reference set and classify.
    pub async fn identify(&self, image_bytes: &[u8]) -> Result<ClassificationResult, IdentifyError> {
        if image_bytes.is_empty() {
            return Err(IdentifyError::InvalidInput("image payload is empty".into()));
        }
        let started = Instant::now();
        let query = self.embed(image_bytes).await?;
        self.decide(&query, started).await
    }

    /// Classify a caller-supplied query embedding, skipping the provider.
    pub async fn identify_embedding(
        &self,
        query: &[f64],
    ) -> Result<ClassificationResult, IdentifyError> {
        if query.len() != self.settings.dimension {
            return Err(MatchError::DimensionMismatch {
                expected: self.settings.dimension,
                found: query.len(),
            }
            .into());
        }
        self.decide(query, Instant::now()).await
    }

    async fn embed(&self, image_bytes: &[u8]) -> Result<Vec<f64>, IdentifyError> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.settings.embed_timeout,
            self.provider.embed(image_bytes, self.settings.dimension),
        )
        .await;

        let result = match outcome {
            Ok(Ok(vector)) if vector.len() == self.settings.dimension => Ok(vector),
            Ok(Ok(vector)) => Err(IdentifyError::Embedding(EmbedError::MalformedResponse(
                format!(
                    "provider returned {} values, expected {}",
                    vector.len(),
                    self.settings.dimension
                ),
            ))),
            Ok(Err(err)) => Err(IdentifyError::Embedding(err)),
            Err(_) => Err(IdentifyError::EmbeddingTimeout(self.settings.embed_timeout)),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_embedding(started.elapsed(), result.is_ok());
        }
        if let Err(err) = &result {
            warn!(provider = self.provider.name(), error = %err, "embedding generation failed");
        }
        result
    }

    async fn decide(
        &self,
        query: &[f64],
        started: Instant,
    ) -> Result<ClassificationResult, IdentifyError> {
        let matches = self.ranker.rank(query, self.settings.top_k).await?;
        let result = self.settings.thresholds.classify(&matches);
        debug!(
            status = %result.status,
            building_id = ?result.building_id,
            confidence = result.confidence,
            neighbors = matches.len(),
            "identification decision"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_decision(started.elapsed(), result.status);
        }
        Ok(result)
    }
}

impl std::fmt::Debug for IdentificationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentificationService")
            .field("provider", &self.provider.name())
            .field("ranker", &self.ranker.name())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Failures while assembling a service from configuration.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigLoadError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error("failed to load reference index: {0}")]
    Load(#[from] LoadError),
    #[error(transparent)]
    Match(#[from] MatchError),
}

/// A ready service plus the index handle behind it, if the ranker is
/// in-process.
#[derive(Debug)]
pub struct Assembled {
    pub service: IdentificationService,
    pub index: Option<Arc<IndexHandle>>,
}

/// Open the reference set described by `cfg.index`.
pub async fn open_index(cfg: &HistoricamConfig) -> Result<Arc<IndexHandle>, StartupError> {
    let path = cfg.index.embeddings_path.as_deref().ok_or_else(|| {
        ConfigLoadError::MissingField("index.embeddings_path (EMBEDDINGS_PATH)".into())
    })?;
    let store: Arc<dyn BlobStore> =
        Arc::from(index::blob_store_for(path, cfg.gcp.access_token.clone())?);
    let dimension = Some(cfg.index.dimension);

    if cfg.index.lazy_load {
        info!(path, "reference index will load on first request");
        return Ok(Arc::new(IndexHandle::lazy(store, path, dimension)));
    }
    let loaded = EmbeddingIndex::load(store.as_ref(), path, dimension).await?;
    info!(
        path,
        records = loaded.size(),
        buildings = loaded.building_count(),
        "reference index loaded"
    );
    Ok(Arc::new(IndexHandle::ready(loaded)))
}

/// Build the provider, ranker and service described by `cfg`.
///
/// With the exhaustive backend and `lazy_load` off, the reference index is
/// loaded here and any load error is returned, so a process never starts
/// serving without its index.
pub async fn build_service(cfg: &HistoricamConfig) -> Result<Assembled, StartupError> {
    cfg.validate()?;
    let provider = embed::build_provider(&cfg.embed_config())?;
    let settings = ServiceSettings::from_config(cfg);

    let (ranker, index): (Arc<dyn SimilarityRanker>, Option<Arc<IndexHandle>>) =
        match cfg.ranker.backend {
            RankerBackend::Exhaustive => {
                let handle = open_index(cfg).await?;
                (Arc::new(ExhaustiveRanker::new(Arc::clone(&handle))), Some(handle))
            }
            #[cfg(feature = "vector-search")]
            RankerBackend::VectorSearch => {
                let ranker =
                    matcher::VectorSearchRanker::new(cfg.vector_search_config()?, settings.dimension)?;
                info!(url = %ranker.config().find_neighbors_url(), "using managed vector search");
                (Arc::new(ranker), None)
            }
            #[cfg(not(feature = "vector-search"))]
            RankerBackend::VectorSearch => {
                return Err(ConfigLoadError::Validation(
                    "vector_search backend is disabled at compile time (enable the `vector-search` feature)".into(),
                )
                .into());
            }
        };

    info!(
        provider = provider.name(),
        ranker = ranker.name(),
        top_k = settings.top_k,
        dimension = settings.dimension,
        "identification service ready"
    );
    let service = IdentificationService::new(provider, ranker, settings)?;
    Ok(Assembled { service, index })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use embed::StubEmbeddingProvider;
    use index::EmbeddingRecord;
    use matcher::MatchStatus;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DIM: usize = 4;

    struct FixedProvider(Vec<f64>);

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        async fn embed(&self, _bytes: &[u8], _dimension: usize) -> Result<Vec<f64>, EmbedError> {
            Ok(self.0.clone())
        }
        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        async fn embed(&self, _bytes: &[u8], _dimension: usize) -> Result<Vec<f64>, EmbedError> {
            Err(EmbedError::Upstream {
                status: 503,
                body: "backend overloaded".into(),
            })
        }
        fn name(&self) -> &'static str {
            "failing"
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        async fn embed(&self, _bytes: &[u8], dimension: usize) -> Result<Vec<f64>, EmbedError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![0.0; dimension])
        }
        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[derive(Default)]
    struct RecordingMetrics {
        embeddings: AtomicUsize,
        failures: AtomicUsize,
        decisions: Mutex<Vec<MatchStatus>>,
    }

    impl IdentifyMetrics for RecordingMetrics {
        fn record_embedding(&self, _latency: Duration, ok: bool) {
            self.embeddings.fetch_add(1, Ordering::SeqCst);
            if !ok {
                self.failures.fetch_add(1, Ordering::SeqCst);
            }
        }
        fn record_decision(&self, _latency: Duration, status: MatchStatus) {
            self.decisions.lock().unwrap().push(status);
        }
    }

    fn reference() -> Arc<dyn SimilarityRanker> {
        let index = EmbeddingIndex::from_records(vec![
            EmbeddingRecord::new("1_a", vec![1.0, 0.0, 0.0, 0.0]),
            EmbeddingRecord::new("1_b", vec![1.0, 0.0, 0.0, 0.0]),
            EmbeddingRecord::new("1_c", vec![1.0, 0.0, 0.0, 0.0]),
            EmbeddingRecord::new("2_a", vec![0.0, 1.0, 0.0, 0.0]),
            EmbeddingRecord::new("2_b", vec![0.0, 1.0, 0.0, 0.0]),
        ])
        .unwrap();
        Arc::new(ExhaustiveRanker::from_index(index))
    }

    fn service_with(provider: Arc<dyn EmbeddingProvider>) -> IdentificationService {
        IdentificationService::new(provider, reference(), ServiceSettings::new(DIM)).unwrap()
    }

    #[tokio::test]
    async fn identifies_the_closest_building() {
        let service = service_with(Arc::new(FixedProvider(vec![1.0, 0.0, 0.0, 0.0])));
        let result = service.identify(b"photo").await.unwrap();
        assert_eq!(result.status, MatchStatus::Confident);
        assert_eq!(result.building_id.as_deref(), Some("1"));
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.matches.len(), 3);
    }

    #[tokio::test]
    async fn orthogonal_query_is_no_match() {
        let service = service_with(Arc::new(FixedProvider(vec![0.0, 0.0, 1.0, 0.0])));
        let result = service.identify(b"photo").await.unwrap();
        assert_eq!(result.status, MatchStatus::NoMatch);
        assert_eq!(result.building_id, None);
        assert!(result.confidence.abs() < 1e-9);
    }

    #[tokio::test]
    async fn provider_failure_is_surfaced() {
        let metrics = Arc::new(RecordingMetrics::default());
        let service = service_with(Arc::new(FailingProvider)).with_metrics(metrics.clone());
        let err = service.identify(b"photo").await.unwrap_err();
        assert!(matches!(err, IdentifyError::Embedding(EmbedError::Upstream { status: 503, .. })));
        assert_eq!(metrics.failures.load(Ordering::SeqCst), 1);
        assert!(metrics.decisions.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let settings = ServiceSettings {
            embed_timeout: Duration::from_millis(100),
            ..ServiceSettings::new(DIM)
        };
        let service =
            IdentificationService::new(Arc::new(SlowProvider), reference(), settings).unwrap();
        let err = service.identify(b"photo").await.unwrap_err();
        assert!(matches!(err, IdentifyError::EmbeddingTimeout(d) if d == Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn short_provider_vector_is_an_embedding_error() {
        let service = service_with(Arc::new(FixedProvider(vec![1.0, 0.0])));
        let err = service.identify(b"photo").await.unwrap_err();
        assert!(matches!(err, IdentifyError::Embedding(EmbedError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn empty_upload_is_rejected_before_embedding() {
        let metrics = Arc::new(RecordingMetrics::default());
        let service = service_with(Arc::new(StubEmbeddingProvider)).with_metrics(metrics.clone());
        assert!(matches!(
            service.identify(&[]).await.unwrap_err(),
            IdentifyError::InvalidInput(_)
        ));
        assert_eq!(metrics.embeddings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn identify_embedding_checks_dimension() {
        let service = service_with(Arc::new(StubEmbeddingProvider));
        let err = service.identify_embedding(&[1.0, 0.0]).await.unwrap_err();
        assert!(matches!(
            err,
            IdentifyError::Match(MatchError::DimensionMismatch { expected: 4, found: 2 })
        ));

        let result = service.identify_embedding(&[0.0, 1.0, 0.0, 0.0]).await.unwrap();
        assert_eq!(result.building_id.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn identify_is_idempotent_with_deterministic_provider() {
        let metrics = Arc::new(RecordingMetrics::default());
        let service = service_with(Arc::new(StubEmbeddingProvider)).with_metrics(metrics.clone());
        let first = service.identify(b"same photo").await.unwrap();
        let second = service.identify(b"same photo").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(metrics.embeddings.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.decisions.lock().unwrap().len(), 2);
    }

    #[test]
    fn invalid_settings_rejected() {
        let settings = ServiceSettings {
            top_k: 0,
            ..ServiceSettings::new(DIM)
        };
        assert!(IdentificationService::new(Arc::new(StubEmbeddingProvider), reference(), settings).is_err());
    }
}
