//! `/health` endpoint.

use serde::Serialize;

use crate::hub::Hub;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the hub started.
    pub uptime_secs: u64,
    /// Current WebSocket connection count.
    pub connections: usize,
    /// Deferred sends waiting to fire.
    pub pending_schedules: usize,
    /// Whether the transport session is usable.
    pub transport_authenticated: bool,
}

/// Build a health response from live hub state.
pub fn health_check(hub: &Hub) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: hub.uptime().as_secs(),
        connections: hub.registry().len(),
        pending_schedules: hub.schedule().len(),
        transport_authenticated: hub.transport().is_authenticated(),
    }
}
