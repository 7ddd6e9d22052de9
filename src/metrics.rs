//! Prometheus metrics
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed with [`setup_metrics`].

use crate::hardware::ExecutionProvider;
use crate::models::PipelineKind;
use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record the outcome of one provider probe
pub fn record_probe_result(provider: ExecutionProvider, supported: bool) {
    metrics::counter!("amuse_probe_results_total",
        "provider" => provider.as_str(),
        "outcome" => if supported { "supported" } else { "unsupported" }
    )
    .increment(1);
}

/// Record pipeline construction
pub fn record_pipeline_loaded(kind: PipelineKind) {
    metrics::counter!("amuse_pipelines_loaded_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record pipeline release
pub fn record_pipeline_unloaded(kind: PipelineKind) {
    metrics::counter!("amuse_pipelines_unloaded_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Update loaded pipeline gauge
pub fn update_active_pipelines(count: usize) {
    metrics::gauge!("amuse_pipelines_active").set(count as f64);
}

pub fn record_download_bytes(bytes: u64) {
    metrics::counter!("amuse_download_bytes_total").increment(bytes);
}

/// Record a finished queue entry (`installed`, `errored` or `canceled`)
pub fn record_download_outcome(outcome: &'static str) {
    metrics::counter!("amuse_downloads_total",
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_probe_result(ExecutionProvider::DirectMl, true);
        record_pipeline_loaded(PipelineKind::Flux);
        record_pipeline_unloaded(PipelineKind::Flux);
        update_active_pipelines(0);
        record_download_bytes(1024);
        record_download_outcome("installed");
    }
}
