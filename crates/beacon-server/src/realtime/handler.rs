//! Per-connection hook.

use std::sync::Arc;

use async_trait::async_trait;

use super::connection::ClientConnection;
use super::gateway::RealtimeGateway;

/// Application hook for real-time connections. Every method defaults to a
/// no-op.
///
/// Use `gateway.emit(..)` to push events to every client across instances.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// A client finished the upgrade and is registered.
    async fn on_connect(&self, _gateway: &RealtimeGateway, _connection: &Arc<ClientConnection>) {}

    /// A text frame arrived.
    async fn on_message(
        &self,
        _gateway: &RealtimeGateway,
        _connection: &Arc<ClientConnection>,
        _text: &str,
    ) {
    }

    /// The client is gone and has been unregistered.
    async fn on_disconnect(&self, _gateway: &RealtimeGateway, _connection: &Arc<ClientConnection>) {}
}

/// Handler that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHandler;

impl ConnectionHandler for NoopHandler {}
