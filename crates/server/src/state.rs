use crate::config::ServerConfig;
use crate::telemetry::PrometheusIdentifyMetrics;
use historicam::{build_service, HistoricamConfig, IdentificationService, StartupError};
use index::IndexHandle;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Shared application state
#[derive(Clone)]
pub struct ServerState {
    /// Server configuration
    pub config: Arc<ServerConfig>,

    /// Identification pipeline (shared across requests)
    pub service: Arc<IdentificationService>,

    /// Reference index behind the exhaustive ranker. `None` with a managed
    /// vector-search backend.
    pub index: Option<Arc<IndexHandle>>,

    /// Renders `/metrics`; `None` when metrics are disabled.
    pub prometheus: Option<PrometheusHandle>,
}

impl ServerState {
    /// Assemble the identification pipeline described by `identification`.
    ///
    /// When a Prometheus handle is supplied the service reports into the
    /// installed recorder.
    pub async fn new(
        config: ServerConfig,
        identification: &HistoricamConfig,
        prometheus: Option<PrometheusHandle>,
    ) -> Result<Self, StartupError> {
        let assembled = build_service(identification).await?;
        let service = match prometheus {
            Some(_) => assembled
                .service
                .with_metrics(Arc::new(PrometheusIdentifyMetrics)),
            None => assembled.service,
        };
        Ok(Self {
            config: Arc::new(config),
            service: Arc::new(service),
            index: assembled.index,
            prometheus,
        })
    }

    /// State around an already-built service.
    pub fn with_service(
        config: ServerConfig,
        service: IdentificationService,
        index: Option<Arc<IndexHandle>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            service: Arc::new(service),
            index,
            prometheus: None,
        }
    }

    /// Check if API key is valid
    pub fn is_valid_api_key(&self, key: &str) -> bool {
        self.config
            .api_keys
            .iter()
            .fold(false, |found, known| {
                found | bool::from(known.as_bytes().ct_eq(key.as_bytes()))
            })
    }
}

/// Server metadata for health checks
#[derive(Debug, serde::Serialize)]
pub struct ServerMetadata {
    pub version: String,
    pub uptime_seconds: u64,
    pub provider: &'static str,
    pub ranker: &'static str,
    pub dimension: usize,
    pub top_k: usize,
    pub confidence_threshold: f64,
    pub backup_threshold: f64,
}
