use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: field saves issued. Labels: field, status.
pub const SAVES_TOTAL: &str = "slated_saves_total";

/// Histogram: save round-trip latency in seconds.
pub const SAVE_DURATION_SECONDS: &str = "slated_save_duration_seconds";

/// Counter: conflict queries issued.
pub const CONFLICT_CHECKS_TOTAL: &str = "slated_conflict_checks_total";

/// Counter: conflict results discarded because a newer query superseded them.
pub const CONFLICT_RESULTS_STALE_TOTAL: &str = "slated_conflict_results_stale_total";

/// Histogram: conflict query latency in seconds.
pub const CONFLICT_CHECK_DURATION_SECONDS: &str = "slated_conflict_check_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: saves currently in flight.
pub const SAVES_IN_FLIGHT: &str = "slated_saves_in_flight";

/// Gauge: open edit sessions.
pub const SESSIONS_ACTIVE: &str = "slated_sessions_active";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
