//! Connection supervisor.
//!
//! Owns the store link and all retry state. The initial connection attempt
//! is shared by every caller of [`StoreSupervisor::start`] and is fatal on
//! failure. Once connected, a background loop consumes disconnect
//! notifications and re-runs the same connect procedure until it succeeds,
//! for as long as the process lives.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{OnceCell, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use beacon_settings::StoreSettings;

use crate::backoff::ReconnectPolicy;
use crate::connector::{DisconnectNotifier, StoreConnector};
use crate::errors::StoreError;
use crate::state::ConnectionState;

/// Counters describing supervisor activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Initial connection attempts (0 or 1).
    pub initial_attempts: u64,
    /// Reconnect sequences started by a disconnect notification.
    pub reconnect_sequences: u64,
    /// Individual connect attempts made during reconnect sequences.
    pub reconnect_attempts: u64,
    /// Generation of the current (or last) link.
    pub generation: u64,
}

/// Supervises the lifecycle of one persistent store connection.
pub struct StoreSupervisor<C: StoreConnector> {
    inner: Arc<Inner<C>>,
}

impl<C: StoreConnector> Clone for StoreSupervisor<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<C: StoreConnector> {
    connector: C,
    address: String,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
    state_tx: watch::Sender<ConnectionState>,
    started: OnceCell<Result<(), StoreError>>,
    link: Mutex<Option<C::Link>>,
    next_generation: AtomicU64,
    current_generation: AtomicU64,
    disconnect_tx: mpsc::UnboundedSender<u64>,
    disconnect_rx: Mutex<Option<mpsc::UnboundedReceiver<u64>>>,
    initial_attempts: AtomicU64,
    reconnect_sequences: AtomicU64,
    reconnect_attempts: AtomicU64,
    cancel: CancellationToken,
}

impl<C: StoreConnector> StoreSupervisor<C> {
    /// Create a supervisor in the `Disconnected` state. Nothing is dialed
    /// until [`start`](Self::start).
    pub fn new(connector: C, settings: &StoreSettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                connector,
                address: settings.address.clone(),
                connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
                policy: ReconnectPolicy::from_settings(settings),
                state_tx,
                started: OnceCell::new(),
                link: Mutex::new(None),
                next_generation: AtomicU64::new(0),
                current_generation: AtomicU64::new(0),
                disconnect_tx,
                disconnect_rx: Mutex::new(Some(disconnect_rx)),
                initial_attempts: AtomicU64::new(0),
                reconnect_sequences: AtomicU64::new(0),
                reconnect_attempts: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Make the initial connection attempt.
    ///
    /// Idempotent: concurrent and repeated callers share one attempt and
    /// observe the same outcome. An `Err` is unrecoverable; the caller is
    /// expected to terminate the process. On success the reconnect loop is
    /// running when this returns.
    pub async fn start(&self) -> Result<(), StoreError> {
        self.inner
            .started
            .get_or_init(|| self.initial_connect())
            .await
            .clone()
    }

    async fn initial_connect(&self) -> Result<(), StoreError> {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return Err(StoreError::ShutDown);
        }
        let _ = inner.initial_attempts.fetch_add(1, Ordering::Relaxed);
        info!(address = %inner.address, "connecting to store");

        match inner.connect_once().await {
            Ok(generation) => {
                info!(address = %inner.address, generation, "store connection ready");
                if let Some(rx) = inner.disconnect_rx.lock().take() {
                    let _ = tokio::spawn(Arc::clone(inner).run(rx));
                }
                Ok(())
            }
            Err(e) => {
                error!(address = %inner.address, error = %e, "store connection failed at startup");
                Err(e)
            }
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Configured store address.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Activity counters.
    pub fn stats(&self) -> StoreStats {
        let inner = &self.inner;
        StoreStats {
            initial_attempts: inner.initial_attempts.load(Ordering::Relaxed),
            reconnect_sequences: inner.reconnect_sequences.load(Ordering::Relaxed),
            reconnect_attempts: inner.reconnect_attempts.load(Ordering::Relaxed),
            generation: inner.current_generation.load(Ordering::Acquire),
        }
    }

    /// Run `f` against the current link, if one is established.
    pub fn with_link<R>(&self, f: impl FnOnce(&C::Link) -> R) -> Option<R> {
        self.inner.link.lock().as_ref().map(f)
    }

    /// Stop the reconnect loop and drop the link.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        drop(self.inner.link.lock().take());
        self.inner.set_state(ConnectionState::Disconnected);
        info!(address = %self.inner.address, "store supervisor shut down");
    }
}

impl<C: StoreConnector> Inner<C> {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "store connection state changed");
        }
    }

    /// One connect attempt with a fresh generation. Installs the link and
    /// moves to `Connected` on success.
    async fn connect_once(&self) -> Result<u64, StoreError> {
        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let notifier = DisconnectNotifier::new(generation, self.disconnect_tx.clone());
        self.set_state(ConnectionState::Connecting);

        let result = match tokio::time::timeout(
            self.connect_timeout,
            self.connector.connect(&self.address, notifier),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                address: self.address.clone(),
                timeout_ms: u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match result {
            Ok(link) => {
                *self.link.lock() = Some(link);
                self.current_generation.store(generation, Ordering::Release);
                self.set_state(ConnectionState::Connected);
                Ok(generation)
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Sole consumer of disconnect notifications.
    ///
    /// Notifications are handled one at a time, so anything that arrives
    /// during a reconnect sequence is judged against the replacement link's
    /// generation afterwards and discarded as stale.
    async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<u64>) {
        loop {
            let generation = tokio::select! {
                () = self.cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(generation) => generation,
                    None => break,
                },
            };

            let current = self.current_generation.load(Ordering::Acquire);
            if generation != current {
                debug!(generation, current, "ignoring stale disconnect notification");
                continue;
            }
            self.reconnect(generation).await;
        }
        debug!(address = %self.address, "store supervisor loop stopped");
    }

    async fn reconnect(&self, lost_generation: u64) {
        let _ = self.reconnect_sequences.fetch_add(1, Ordering::Relaxed);
        drop(self.link.lock().take());
        self.set_state(ConnectionState::Disconnected);
        warn!(
            address = %self.address,
            generation = lost_generation,
            "store connection lost, reconnecting"
        );

        let mut attempt: u32 = 0;
        loop {
            let _ = self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
            info!(address = %self.address, attempt = attempt + 1, "store reconnect attempt");

            let result = tokio::select! {
                () = self.cancel.cancelled() => return,
                result = self.connect_once() => result,
            };

            match result {
                Ok(generation) => {
                    info!(address = %self.address, generation, "store connection re-established");
                    return;
                }
                Err(e) => {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        address = %self.address,
                        error = %e,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "store reconnect failed, retrying"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use beacon_logging::capture_logs;
    use tracing::Level;

    use super::*;

    /// Connector whose outcomes are scripted per call. Successful links are
    /// their generation; their notifiers are forwarded to the test.
    struct ScriptedConnector {
        outcomes: Mutex<VecDeque<Result<(), StoreError>>>,
        calls: Arc<AtomicUsize>,
        delay: Duration,
        notifiers: mpsc::UnboundedSender<DisconnectNotifier>,
    }

    #[async_trait]
    impl StoreConnector for ScriptedConnector {
        type Link = u64;

        async fn connect(
            &self,
            _address: &str,
            notifier: DisconnectNotifier,
        ) -> Result<u64, StoreError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.outcomes.lock().pop_front().unwrap_or(Ok(()))?;
            let generation = notifier.generation();
            let _ = self.notifiers.send(notifier);
            Ok(generation)
        }
    }

    struct Harness {
        supervisor: StoreSupervisor<ScriptedConnector>,
        calls: Arc<AtomicUsize>,
        notifiers: mpsc::UnboundedReceiver<DisconnectNotifier>,
    }

    fn settings() -> StoreSettings {
        StoreSettings {
            address: "scripted://db".into(),
            connect_timeout_ms: 1_000,
            reconnect_base_delay_ms: 5,
            reconnect_max_delay_ms: 20,
            reconnect_jitter_factor: 0.0,
        }
    }

    fn harness(outcomes: Vec<Result<(), StoreError>>, delay: Duration) -> Harness {
        harness_with(outcomes, delay, &settings())
    }

    fn harness_with(
        outcomes: Vec<Result<(), StoreError>>,
        delay: Duration,
        settings: &StoreSettings,
    ) -> Harness {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = ScriptedConnector {
            outcomes: Mutex::new(outcomes.into()),
            calls: Arc::clone(&calls),
            delay,
            notifiers: tx,
        };
        Harness {
            supervisor: StoreSupervisor::new(connector, settings),
            calls,
            notifiers: rx,
        }
    }

    fn refused() -> StoreError {
        StoreError::Connect {
            address: "scripted://db".into(),
            message: "connection refused".into(),
        }
    }

    async fn next_notifier(h: &mut Harness) -> DisconnectNotifier {
        tokio::time::timeout(Duration::from_secs(2), h.notifiers.recv())
            .await
            .expect("timed out waiting for a new link")
            .expect("connector dropped")
    }

    async fn wait_connected(h: &Harness) {
        let mut rx = h.supervisor.subscribe_state();
        let _ = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.is_connected()))
            .await
            .expect("timed out waiting for Connected")
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_start_makes_one_attempt() {
        let h = harness(vec![], Duration::from_millis(30));

        let (a, b) = tokio::join!(h.supervisor.start(), h.supervisor.start());
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        h.supervisor.start().await.unwrap();
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.supervisor.stats().initial_attempts, 1);
        assert_eq!(h.supervisor.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn initial_failure_is_fatal_and_not_retried() {
        let (logs, _guard) = capture_logs();
        let h = harness(vec![Err(refused())], Duration::ZERO);

        let result = h.supervisor.start().await;
        assert_matches!(result, Err(StoreError::Connect { .. }));
        assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);

        // A repeated start observes the same outcome without dialing again.
        assert_eq!(h.supervisor.start().await, result);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.supervisor.stats().reconnect_attempts, 0);

        assert!(logs.has_event(Level::ERROR, "store connection failed at startup"));
        assert_eq!(logs.count_matching(Level::INFO, "store reconnect attempt"), 0);
    }

    #[tokio::test]
    async fn initial_timeout_is_fatal() {
        let s = StoreSettings {
            connect_timeout_ms: 20,
            ..settings()
        };
        let h = harness_with(vec![], Duration::from_millis(500), &s);

        let result = h.supervisor.start().await;
        assert_matches!(result, Err(StoreError::Timeout { timeout_ms: 20, .. }));
    }

    #[tokio::test]
    async fn each_disconnect_triggers_one_reconnect() {
        let mut h = harness(vec![], Duration::ZERO);
        h.supervisor.start().await.unwrap();

        let mut current = next_notifier(&mut h).await;
        for _ in 0..3 {
            current.notify();
            let replacement = next_notifier(&mut h).await;
            assert_eq!(replacement.generation(), current.generation() + 1);
            wait_connected(&h).await;
            current = replacement;
        }

        let stats = h.supervisor.stats();
        assert_eq!(stats.reconnect_sequences, 3);
        assert_eq!(stats.reconnect_attempts, 3);
        assert_eq!(stats.generation, current.generation());
        assert_eq!(h.calls.load(Ordering::SeqCst), 4);
        assert_eq!(h.supervisor.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn burst_of_notifications_yields_one_sequence() {
        let mut h = harness(vec![], Duration::from_millis(10));
        h.supervisor.start().await.unwrap();
        let first = next_notifier(&mut h).await;

        for _ in 0..5 {
            first.notify();
        }
        let _second = next_notifier(&mut h).await;
        wait_connected(&h).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A late signal from the replaced link is stale as well.
        first.notify();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(h.supervisor.stats().reconnect_sequences, 1);
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_reconnect_attempts_back_off_and_retry() {
        let (logs, _guard) = capture_logs();
        let mut h = harness(
            vec![Ok(()), Err(refused()), Err(refused()), Ok(())],
            Duration::ZERO,
        );
        h.supervisor.start().await.unwrap();

        next_notifier(&mut h).await.notify();
        let _replacement = next_notifier(&mut h).await;
        wait_connected(&h).await;

        let stats = h.supervisor.stats();
        assert_eq!(stats.reconnect_sequences, 1);
        assert_eq!(stats.reconnect_attempts, 3);
        assert_eq!(logs.count_matching(Level::WARN, "store reconnect failed"), 2);
        assert!(logs.has_event(Level::INFO, "store connection re-established"));
    }

    #[tokio::test]
    async fn single_disconnect_logs_single_attempt() {
        let (logs, _guard) = capture_logs();
        let mut h = harness(vec![], Duration::ZERO);
        h.supervisor.start().await.unwrap();
        assert!(logs.has_event(Level::INFO, "store connection ready"));

        next_notifier(&mut h).await.notify();
        let _ = next_notifier(&mut h).await;
        wait_connected(&h).await;

        assert_eq!(logs.count_matching(Level::INFO, "store reconnect attempt"), 1);
        assert_eq!(h.supervisor.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn state_transitions_are_observable() {
        let mut h = harness(vec![], Duration::from_millis(10));
        let mut rx = h.supervisor.subscribe_state();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Disconnected);

        h.supervisor.start().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connected);

        next_notifier(&mut h).await.notify();
        let seen = rx.wait_for(|s| *s != ConnectionState::Connected).await.unwrap();
        assert_ne!(*seen, ConnectionState::Connected);
        drop(seen);
        wait_connected(&h).await;
    }

    #[tokio::test]
    async fn shutdown_stops_reconnection() {
        let mut h = harness(vec![], Duration::ZERO);
        h.supervisor.start().await.unwrap();
        let notifier = next_notifier(&mut h).await;
        assert_eq!(h.supervisor.with_link(|g| *g), Some(notifier.generation()));

        h.supervisor.shutdown();
        notifier.notify();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.supervisor.stats().reconnect_sequences, 0);
        assert_eq!(h.supervisor.with_link(|g| *g), None);
    }

    #[tokio::test]
    async fn start_after_shutdown_is_rejected() {
        let h = harness(vec![], Duration::ZERO);
        h.supervisor.shutdown();
        assert_matches!(h.supervisor.start().await, Err(StoreError::ShutDown));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }
}
