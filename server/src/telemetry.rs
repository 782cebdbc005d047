use config::ObservabilityConfig;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Install the Prometheus recorder backing `/metrics`.
pub fn init_metrics(config: &ObservabilityConfig) -> anyhow::Result<Option<PrometheusHandle>> {
    if !config.metrics_enabled {
        return Ok(None);
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(Some(handle))
}

fn describe_metrics() {
    metrics::describe_counter!(
        "tenancy_resolutions_total",
        "Tenant resolutions by outcome (matched_by or no-tenant reason)"
    );
    metrics::describe_counter!(
        "tenancy_rejections_total",
        "Requests or jobs rejected by the access gate, by reason"
    );
    metrics::describe_counter!(
        "tenancy_unscoped_access_total",
        "Audited unscoped repository accesses, by record type"
    );
    metrics::describe_counter!("tenancy_jobs_total", "Background job outcomes, by status");
    metrics::describe_counter!("tenancy_alias_cache_total", "Alias cache lookups, by result");
}
