//! In-process broker.
//!
//! Every handle opened against the same [`MemoryHub`] and hub name shares
//! its channels, so several gateways in one process behave like instances
//! sharing an external broker.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::errors::BrokerError;
use crate::handle::{BrokerPublisher, BrokerSubscriber, Subscription};

/// Buffered payloads per channel before slow subscribers lag.
const CHANNEL_CAPACITY: usize = 1024;
/// Buffered payloads between the forwarder and the subscription.
const SUBSCRIPTION_CAPACITY: usize = 256;

type ChannelKey = (String, String);

/// Registry of in-process channels, keyed by hub name and channel.
#[derive(Clone, Default)]
pub struct MemoryHub {
    channels: Arc<Mutex<HashMap<ChannelKey, broadcast::Sender<Bytes>>>>,
}

impl MemoryHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish-role handle for hub `name`.
    pub fn publisher(&self, name: &str) -> MemoryPublisher {
        MemoryPublisher {
            hub: self.clone(),
            name: name.to_string(),
        }
    }

    /// Subscribe-role handle for hub `name`.
    pub fn subscriber(&self, name: &str) -> MemorySubscriber {
        MemorySubscriber {
            hub: self.clone(),
            name: name.to_string(),
        }
    }

    /// Subscribe under the registry lock so a concurrent prune cannot drop
    /// the channel between lookup and subscribe.
    fn receiver(&self, name: &str, channel: &str) -> broadcast::Receiver<Bytes> {
        let mut channels = self.channels.lock();
        prune(&mut channels);
        channels
            .entry((name.to_string(), channel.to_string()))
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn existing_sender(&self, name: &str, channel: &str) -> Option<broadcast::Sender<Bytes>> {
        let mut channels = self.channels.lock();
        prune(&mut channels);
        channels
            .get(&(name.to_string(), channel.to_string()))
            .cloned()
    }

    fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }
}

/// Forget channels whose subscribers have all gone.
fn prune(channels: &mut HashMap<ChannelKey, broadcast::Sender<Bytes>>) {
    channels.retain(|_, sender| sender.receiver_count() > 0);
}

impl std::fmt::Debug for MemoryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHub")
            .field("channels", &self.channel_count())
            .finish()
    }
}

/// Publish-role handle on a [`MemoryHub`].
#[derive(Clone, Debug)]
pub struct MemoryPublisher {
    hub: MemoryHub,
    name: String,
}

#[async_trait]
impl BrokerPublisher for MemoryPublisher {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<u64, BrokerError> {
        let Some(sender) = self.hub.existing_sender(&self.name, channel) else {
            return Ok(0);
        };
        // Err only means no live receivers
        Ok(sender.send(payload).map_or(0, |n| n as u64))
    }
}

/// Subscribe-role handle on a [`MemoryHub`].
#[derive(Clone, Debug)]
pub struct MemorySubscriber {
    hub: MemoryHub,
    name: String,
}

#[async_trait]
impl BrokerSubscriber for MemorySubscriber {
    async fn subscribe(self: Box<Self>, channel: &str) -> Result<Subscription, BrokerError> {
        let mut source = self.hub.receiver(&self.name, channel);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let channel_name = channel.to_string();

        let reader = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %channel_name, skipped, "memory subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(channel, rx, reader))
    }
}
