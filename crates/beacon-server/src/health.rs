//! `/health` endpoint.

use std::time::Instant;

use beacon_store::ConnectionState;
use serde::Serialize;

use crate::realtime::GatewayState;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` when the store is connected and the gateway is serving,
    /// `"degraded"` otherwise.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Store connection state.
    pub store: ConnectionState,
    /// Real-time gateway lifecycle state.
    pub gateway: GatewayState,
    /// Current WebSocket connection count.
    pub connections: usize,
}

/// Build a health response from live state.
pub fn health_check(
    start_time: Instant,
    store: ConnectionState,
    gateway: GatewayState,
    connections: usize,
) -> HealthResponse {
    let healthy = store.is_connected() && gateway == GatewayState::Serving;
    HealthResponse {
        status: if healthy { "ok" } else { "degraded" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        store,
        gateway,
        connections,
    }
}
