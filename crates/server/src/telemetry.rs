//! Prometheus-backed identification metrics.

use historicam::{IdentifyMetrics, MatchStatus};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

pub const EMBEDDING_SECONDS: &str = "historicam_embedding_seconds";
pub const EMBEDDING_FAILURES: &str = "historicam_embedding_failures_total";
pub const IDENTIFY_TOTAL: &str = "historicam_identify_total";
pub const IDENTIFY_SECONDS: &str = "historicam_identify_seconds";

/// Install the process-wide recorder. Call once, before serving.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Forwards service observations to the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusIdentifyMetrics;

impl IdentifyMetrics for PrometheusIdentifyMetrics {
    fn record_embedding(&self, latency: Duration, ok: bool) {
        histogram!(EMBEDDING_SECONDS).record(latency.as_secs_f64());
        if !ok {
            counter!(EMBEDDING_FAILURES).increment(1);
        }
    }

    fn record_decision(&self, latency: Duration, status: MatchStatus) {
        counter!(IDENTIFY_TOTAL, "status" => status.as_str()).increment(1);
        histogram!(IDENTIFY_SECONDS).record(latency.as_secs_f64());
    }
}
