//! Broker handle traits.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::BrokerError;

/// Opens broker handles. Each role gets its own connection.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open a handle in the publish role. Resolves once the handle is ready.
    async fn open_publisher(&self, address: &str) -> Result<Arc<dyn BrokerPublisher>, BrokerError>;

    /// Open a handle in the subscribe role. Resolves once the handle is ready.
    async fn open_subscriber(
        &self,
        address: &str,
    ) -> Result<Box<dyn BrokerSubscriber>, BrokerError>;
}

/// A ready handle in the publish role. Shared by every local client.
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    /// Publish `payload` on `channel`. Returns how many subscribers received it,
    /// when the broker reports that.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<u64, BrokerError>;
}

impl std::fmt::Debug for dyn BrokerPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerPublisher").finish_non_exhaustive()
    }
}

/// A ready handle in the subscribe role.
#[async_trait]
pub trait BrokerSubscriber: Send {
    /// Subscribe to `channel`, consuming the handle.
    async fn subscribe(self: Box<Self>, channel: &str) -> Result<Subscription, BrokerError>;
}

impl std::fmt::Debug for dyn BrokerSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSubscriber").finish_non_exhaustive()
    }
}

/// Stream of payloads delivered on one channel.
///
/// Ends (returns `None`) when the underlying broker link is lost.
/// Dropping it stops the background reader.
pub struct Subscription {
    channel: String,
    rx: mpsc::Receiver<Bytes>,
    reader: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wrap a receiver fed by `reader`.
    pub fn new(channel: impl Into<String>, rx: mpsc::Receiver<Bytes>, reader: JoinHandle<()>) -> Self {
        Self {
            channel: channel.into(),
            rx,
            reader: Some(reader),
        }
    }

    /// Wrap a receiver with no background reader.
    pub fn from_receiver(channel: impl Into<String>, rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            rx,
            reader: None,
        }
    }

    /// Channel name.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next payload, or `None` once the link is gone.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
