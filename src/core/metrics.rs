use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    if PROM_HANDLE.get().is_none() {
        let handle = PrometheusBuilder::new().install_recorder()?;
        let _ = PROM_HANDLE.set(handle);
    }
    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    metrics::describe_counter!(
        "conversion_poll_attempts_total",
        "Polling attempts started, by job kind"
    );
    metrics::describe_counter!(
        "conversion_poll_outcomes_total",
        "Terminal polling outcomes, by job kind and outcome"
    );
    metrics::describe_histogram!(
        "conversion_poll_duration_seconds",
        metrics::Unit::Seconds,
        "Wall time from first attempt to terminal outcome"
    );
    metrics::describe_counter!(
        "conversion_cache_hits_total",
        "Probes answered from the conversion result cache"
    );
    metrics::describe_counter!(
        "conversion_tasks_recovered_total",
        "Stale in-progress tasks returned to the queue"
    );
    metrics::describe_counter!("http_requests_total", "HTTP responses, by status");
}
