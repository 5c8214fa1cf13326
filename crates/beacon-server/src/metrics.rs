//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Fails if a recorder is already installed.
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

/// Failing HTTP responses (counter, labels: class).
pub const HTTP_FAILURES_TOTAL: &str = "http_failures_total";
/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Upgrade requests refused (counter, labels: reason).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Broadcast drops total (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Envelopes published to the broker (counter).
pub const FANOUT_PUBLISHED_TOTAL: &str = "fanout_published_total";
/// Envelopes from other instances delivered locally (counter).
pub const FANOUT_RECEIVED_TOTAL: &str = "fanout_received_total";
/// Broker publish or decode failures (counter, labels: stage).
pub const FANOUT_ERRORS_TOTAL: &str = "fanout_errors_total";
