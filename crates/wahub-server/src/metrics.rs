//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
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

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Connections evicted after a failed write (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Keepalive probes that failed (counter).
pub const WS_KEEPALIVE_FAILURES_TOTAL: &str = "ws_keepalive_failures_total";
/// Read errors (counter, labels: kind).
pub const WS_READ_ERRORS_TOTAL: &str = "ws_read_errors_total";
/// Panics caught inside a read loop iteration (counter).
pub const WS_SESSION_PANICS_TOTAL: &str = "ws_session_panics_total";
/// Client commands handled (counter, labels: command).
pub const COMMANDS_TOTAL: &str = "commands_total";
/// Scheduled entries executed (counter).
pub const SCHEDULED_DISPATCHED_TOTAL: &str = "scheduled_dispatched_total";
/// Per-recipient failures inside executed scheduled entries (counter).
pub const SCHEDULED_SEND_FAILURES_TOTAL: &str = "scheduled_send_failures_total";
/// Panics caught while executing a scheduled entry (counter).
pub const SCHEDULED_DISPATCH_PANICS_TOTAL: &str = "scheduled_dispatch_panics_total";
/// Entries waiting in the schedule queue (gauge).
pub const SCHEDULED_PENDING: &str = "scheduled_pending";
/// Transport events bridged to clients (counter, labels: kind).
pub const TRANSPORT_EVENTS_TOTAL: &str = "transport_events_total";
/// Failed transport connect attempts (counter).
pub const TRANSPORT_CONNECT_FAILURES_TOTAL: &str = "transport_connect_failures_total";
