//! Event delivery to locally connected WebSocket clients.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::connection::ClientConnection;
use super::event::RealtimeEvent;
use crate::metrics::WS_BROADCAST_DROPS_TOTAL;

/// Local client registry.
pub struct BroadcastManager {
    /// Connected clients indexed by connection ID.
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
}

impl BroadcastManager {
    /// Create a new broadcast manager.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection.
    pub async fn add(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(connection.id.clone(), connection);
    }

    /// Add a connection unless `max` are already registered.
    pub async fn try_add(&self, connection: Arc<ClientConnection>, max: usize) -> bool {
        let mut conns = self.connections.write().await;
        if conns.len() >= max {
            return false;
        }
        let _ = conns.insert(connection.id.clone(), connection);
        true
    }

    /// Remove a connection by ID.
    pub async fn remove(&self, connection_id: &str) {
        let mut conns = self.connections.write().await;
        let _ = conns.remove(connection_id);
    }

    /// Broadcast an event to all connections. Returns how many accepted it.
    pub async fn broadcast_all(&self, event: &RealtimeEvent) -> usize {
        let json = match serde_json::to_string(event) {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(event_type = %event.event_type, error = %e, "failed to serialize event");
                return 0;
            }
        };
        let conns = self.connections.read().await;
        debug!(
            event_type = %event.event_type,
            recipients = conns.len(),
            "broadcast event to all"
        );
        let mut delivered = 0;
        for conn in conns.values() {
            if conn.send(Arc::clone(&json)) {
                delivered += 1;
            } else {
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                warn!(conn_id = %conn.id, "failed to send event to client");
            }
        }
        delivered
    }

    /// Number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Look up a connection.
    pub async fn get(&self, connection_id: &str) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(connection_id).cloned()
    }
}

impl Default for BroadcastManager {
    fn default() -> Self {
        Self::new()
    }
}
