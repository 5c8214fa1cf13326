//! Listener, store, broker, and real-time transport settings.

use serde::{Deserialize, Serialize};

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listener port (`0` for auto-assign).
    pub port: u16,
    /// How long in-flight work may drain on shutdown, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            shutdown_timeout_ms: 30_000,
        }
    }
}

/// Persistent store connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Store address (`mongodb://host:port/db`, `tcp://host:port`, or `host:port`).
    pub address: String,
    /// Timeout for a single connection attempt in milliseconds.
    pub connect_timeout_ms: u64,
    /// Base delay between failed reconnect attempts in milliseconds.
    pub reconnect_base_delay_ms: u64,
    /// Upper bound on the reconnect delay in milliseconds.
    pub reconnect_max_delay_ms: u64,
    /// Jitter factor (0.0–1.0) applied to reconnect delays.
    pub reconnect_jitter_factor: f64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            address: "mongodb://127.0.0.1:27017/beacon".to_string(),
            connect_timeout_ms: 10_000,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            reconnect_jitter_factor: 0.2,
        }
    }
}

/// Publish/subscribe broker settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Broker address (`redis://host:port` or `memory://name`). `None` disables fan-out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Channel that carries fan-out envelopes between instances.
    pub channel: String,
    /// Timeout for opening each broker handle in milliseconds.
    pub open_timeout_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            address: None,
            channel: "beacon#events".to_string(),
            open_timeout_ms: 5_000,
        }
    }
}

/// Paths served by the built-in routes. The real-time upgrade path must
/// not be one of them.
pub const RESERVED_PATHS: &[&str] = &["/health", "/metrics"];

/// Real-time transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// Upgrade path on the shared listener.
    pub path: String,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Per-connection outbound queue capacity.
    pub send_queue_capacity: usize,
    /// Heartbeat ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a client after this long without a pong, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            path: "/ws".to_string(),
            max_connections: 1_000,
            send_queue_capacity: 256,
            heartbeat_interval_ms: 25_000,
            heartbeat_timeout_ms: 60_000,
            max_message_size: 1024 * 1024, // 1 MB
        }
    }
}
