//! Connector seam and disconnect notification.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::StoreError;

/// Establishes links to the persistent store.
///
/// The supervisor owns the returned link and drops it when the link is
/// replaced or the supervisor shuts down. Implementations must arrange for
/// `notifier` to fire when the link is lost; dropping the link must stop
/// any watcher it started.
#[async_trait]
pub trait StoreConnector: Send + Sync + 'static {
    /// Established link type.
    type Link: Send + 'static;

    /// Open one link to `address`.
    async fn connect(
        &self,
        address: &str,
        notifier: DisconnectNotifier,
    ) -> Result<Self::Link, StoreError>;
}

/// Reports the loss of one specific link back to its supervisor.
///
/// Every link is tagged with a generation number. The supervisor ignores
/// notifications whose generation is not the current link's, so repeated or
/// late signals never start a second reconnect sequence.
#[derive(Clone, Debug)]
pub struct DisconnectNotifier {
    generation: u64,
    tx: mpsc::UnboundedSender<u64>,
}

impl DisconnectNotifier {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<u64>) -> Self {
        Self { generation, tx }
    }

    /// Generation of the link this notifier belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Signal that the link was lost. No-op once the supervisor is gone.
    pub fn notify(&self) {
        let _ = self.tx.send(self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_sends_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = DisconnectNotifier::new(7, tx);
        notifier.notify();
        notifier.clone().notify();
        assert_eq!(rx.recv().await, Some(7));
        assert_eq!(rx.recv().await, Some(7));
        assert_eq!(notifier.generation(), 7);
    }

    #[test]
    fn notify_after_receiver_dropped_is_noop() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        DisconnectNotifier::new(1, tx).notify();
    }
}
