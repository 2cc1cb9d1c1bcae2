//! Prometheus metrics exposition
//!
//! Library crates record through the `metrics` facade
//! (`selections_total`, `probe_races_total`, `probe_wins_total`,
//! `breaker_opens_total`, `store_saves_total`); this module installs the
//! recorder and adds the service-level probe duration histogram rendered
//! on the admin listener's `/metrics` endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return the render handle.
///
/// `probe_duration_seconds` gets explicit buckets so it renders as a real
/// histogram (`_bucket` lines) covering 5ms to 60s, the plausible probe
/// latency range under the default timeout.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("probe_duration_seconds".to_string()),
            &[
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            ],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record one finished probe with its outcome label.
pub fn record_probe(outcome: &str, duration_secs: f64) {
    metrics::counter!("probes_total", "outcome" => outcome.to_string()).increment(1);
    metrics::histogram!("probe_duration_seconds", "outcome" => outcome.to_string())
        .record(duration_secs);
}
