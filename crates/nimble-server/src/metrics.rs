//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Fails if a global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// Connections accepted total (counter, labels: transport).
pub const CONNECTIONS_TOTAL: &str = "nimble_connections_total";
/// Connections closed total (counter).
pub const DISCONNECTIONS_TOTAL: &str = "nimble_disconnections_total";
/// Currently open connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "nimble_connections_active";
/// Packets written to transports (counter).
pub const PACKETS_WRITTEN_TOTAL: &str = "nimble_packets_written_total";
/// Outbound messages dropped before reaching the wire (counter, labels: reason).
pub const MESSAGES_DROPPED_TOTAL: &str = "nimble_messages_dropped_total";
/// Writer loop exits (counter, labels: reason).
pub const WRITER_EXITS_TOTAL: &str = "nimble_writer_exits_total";
/// Sessions evicted by the idle sweeper (counter).
pub const SESSIONS_EVICTED_TOTAL: &str = "nimble_sessions_evicted_total";
/// Handler invocations (counter, labels: route).
pub const HANDLER_REQUESTS_TOTAL: &str = "nimble_handler_requests_total";
/// Handler failures (counter, labels: route, error_type).
pub const HANDLER_ERRORS_TOTAL: &str = "nimble_handler_errors_total";
/// Handler duration seconds (histogram, labels: route).
pub const HANDLER_DURATION_SECONDS: &str = "nimble_handler_duration_seconds";
