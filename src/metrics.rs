// src/metrics.rs
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "pipeline_items_fetched_total",
            "Candidate items returned by source adapters."
        );
        describe_counter!(
            "pipeline_items_admitted_total",
            "Candidate items admitted as new by the dedup gate."
        );
        describe_counter!(
            "pipeline_source_failures_total",
            "Per-source fetch failures, labelled by kind."
        );
        describe_counter!(
            "pipeline_sources_disabled_total",
            "Sources auto-disabled after reaching the failure ceiling."
        );
        describe_counter!(
            "pipeline_summaries_total",
            "Summarization attempts, labelled by outcome."
        );
        describe_counter!(
            "pipeline_deliveries_total",
            "Delivery attempts, labelled by outcome."
        );
        describe_counter!(
            "forward_messages_total",
            "Forwarded messages, labelled by outcome."
        );
        describe_counter!(
            "pipeline_feed_parse_errors_total",
            "Feeds that failed to parse, labelled by adapter."
        );
        describe_counter!(
            "discovery_attempts_total",
            "Discovery strategy attempts, labelled by strategy and outcome."
        );
        describe_histogram!("pipeline_cycle_ms", "Pipeline cycle duration in milliseconds.");
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!(
            "pipeline_last_cycle_ts",
            "Unix ts when a pipeline cycle last finished."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder. Repeated calls in one process share the
    /// first recorder.
    pub fn install() -> anyhow::Result<Self> {
        static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();
        let handle = HANDLE
            .get_or_try_init(|| PrometheusBuilder::new().install_recorder())?
            .clone();
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
