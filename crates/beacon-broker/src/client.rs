//! Address-driven connector.

use std::sync::Arc;

use async_trait::async_trait;

use crate::address::BrokerAddress;
use crate::errors::BrokerError;
use crate::handle::{BrokerConnector, BrokerPublisher, BrokerSubscriber};
use crate::memory::MemoryHub;
use crate::resp::{RespPublisher, RespSubscriber};

/// Opens handles for any supported address scheme.
///
/// `memory://` handles share this client's [`MemoryHub`]; clone the client
/// (or pass the same hub to [`BrokerClient::with_hub`]) to let several
/// gateways in one process see each other's events.
#[derive(Clone, Debug, Default)]
pub struct BrokerClient {
    hub: MemoryHub,
}

impl BrokerClient {
    /// Client with a fresh in-process hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Client backed by an existing hub.
    pub fn with_hub(hub: MemoryHub) -> Self {
        Self { hub }
    }

    /// The in-process hub used for `memory://` addresses.
    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }
}

#[async_trait]
impl BrokerConnector for BrokerClient {
    async fn open_publisher(&self, address: &str) -> Result<Arc<dyn BrokerPublisher>, BrokerError> {
        match BrokerAddress::parse(address)? {
            BrokerAddress::Memory { name } => Ok(Arc::new(self.hub.publisher(&name))),
            redis @ BrokerAddress::Redis { .. } => Ok(Arc::new(RespPublisher::connect(&redis).await?)),
        }
    }

    async fn open_subscriber(
        &self,
        address: &str,
    ) -> Result<Box<dyn BrokerSubscriber>, BrokerError> {
        match BrokerAddress::parse(address)? {
            BrokerAddress::Memory { name } => Ok(Box::new(self.hub.subscriber(&name))),
            redis @ BrokerAddress::Redis { .. } => {
                Ok(Box::new(RespSubscriber::connect(&redis).await?))
            }
        }
    }
}
