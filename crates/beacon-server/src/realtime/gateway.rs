//! Real-time gateway lifecycle and broker fan-out.
//!
//! ```text
//! Uninitialized ─create_transport─► TransportBound ─attach_fan_out─► Attaching ─► FanOutAttached ─► Serving
//!                                        │                               └─(open fails)─► Failed ─serve_local─┐
//!                                        └──────────────────serve_local──────────────────────────────────────►┴► Serving
//! ```
//!
//! The fan-out adapter is installed only after both broker handles report
//! ready. Once installed it lives until [`RealtimeGateway::shutdown`].

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use beacon_broker::address::redact;
use beacon_broker::{BrokerConnector, BrokerError, BrokerPublisher, Subscription};
use beacon_settings::{RESERVED_PATHS, RealtimeSettings};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::broadcast::BroadcastManager;
use super::event::{FanOutEnvelope, RealtimeEvent};
use super::handler::ConnectionHandler;
use super::socket;
use crate::metrics::{FANOUT_ERRORS_TOTAL, FANOUT_PUBLISHED_TOTAL, FANOUT_RECEIVED_TOTAL};
use crate::pipeline::CorsPolicy;

/// Gateway lifecycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayState {
    /// Constructed, no transport yet.
    #[default]
    Uninitialized,
    /// Upgrade route mounted on the HTTP router.
    TransportBound,
    /// Broker handles are being opened.
    Attaching,
    /// Both broker handles ready and the adapter installed.
    FanOutAttached,
    /// Accepting clients.
    Serving,
    /// A broker handle failed to open; no adapter installed.
    Failed,
}

impl GatewayState {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::TransportBound => "transport_bound",
            Self::Attaching => "attaching",
            Self::FanOutAttached => "fan_out_attached",
            Self::Serving => "serving",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for GatewayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gateway failures.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Operation not valid in the current state.
    #[error("gateway is {actual}, cannot {operation}")]
    InvalidState {
        /// What was attempted.
        operation: &'static str,
        /// State at the time.
        actual: GatewayState,
    },

    /// A broker handle could not be opened or subscribed.
    #[error("broker {role} handle failed: {source}")]
    Broker {
        /// `"publish"` or `"subscribe"`.
        role: &'static str,
        /// Underlying failure.
        #[source]
        source: BrokerError,
    },

    /// Publishing an event to other instances failed. Local clients already
    /// received it.
    #[error("fan-out publish failed: {0}")]
    Publish(#[source] BrokerError),

    /// A path collides with a route that is already mounted.
    #[error("path {path} is already routed")]
    PathConflict {
        /// The contested path.
        path: String,
    },

    /// The event could not be serialized.
    #[error("failed to encode fan-out envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The installed adapter: the shared publish handle plus the relay task fed
/// by the subscribe handle.
struct FanOutAdapter {
    publisher: Arc<dyn BrokerPublisher>,
    channel: String,
    address: String,
    relay: Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct Shared {
    pub(crate) settings: RealtimeSettings,
    pub(crate) cors: CorsPolicy,
    pub(crate) handler: Arc<dyn ConnectionHandler>,
    pub(crate) broadcast: Arc<BroadcastManager>,
    pub(crate) shutdown: CancellationToken,
    state: Mutex<GatewayState>,
    fan_out: OnceLock<FanOutAdapter>,
    instance_id: String,
}

/// Real-time gateway. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RealtimeGateway {
    pub(crate) shared: Arc<Shared>,
}

impl RealtimeGateway {
    /// New gateway in [`GatewayState::Uninitialized`].
    pub fn new(
        settings: RealtimeSettings,
        cors: CorsPolicy,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                cors,
                handler,
                broadcast: Arc::new(BroadcastManager::new()),
                shutdown: CancellationToken::new(),
                state: Mutex::new(GatewayState::Uninitialized),
                fan_out: OnceLock::new(),
                instance_id: Uuid::now_v7().to_string(),
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> GatewayState {
        *self.shared.state.lock()
    }

    /// Identifier stamped on envelopes this instance publishes.
    pub fn instance_id(&self) -> &str {
        &self.shared.instance_id
    }

    /// Local client registry.
    pub fn broadcast(&self) -> &Arc<BroadcastManager> {
        &self.shared.broadcast
    }

    /// Whether the fan-out adapter is installed.
    pub fn has_fan_out(&self) -> bool {
        self.shared.fan_out.get().is_some()
    }

    /// Transport settings.
    pub fn settings(&self) -> &RealtimeSettings {
        &self.shared.settings
    }

    fn transition(
        &self,
        operation: &'static str,
        from: &[GatewayState],
        to: GatewayState,
    ) -> Result<(), GatewayError> {
        let mut state = self.shared.state.lock();
        if !from.contains(&state) {
            return Err(GatewayError::InvalidState {
                operation,
                actual: *state,
            });
        }
        debug!(from = %state.as_str(), to = %to, "gateway state change");
        *state = to;
        Ok(())
    }

    /// Mount the WebSocket upgrade route on `router`, so HTTP and real-time
    /// traffic share one listener.
    ///
    /// Fails with [`GatewayError::PathConflict`] when the configured path is
    /// one of the built-in routes.
    pub fn create_transport(&self, router: Router) -> Result<Router, GatewayError> {
        self.create_transport_beside(router, std::iter::empty())
    }

    /// [`create_transport`](Self::create_transport) on a router that already
    /// serves `mounted` paths.
    pub fn create_transport_beside<'a>(
        &self,
        router: Router,
        mounted: impl IntoIterator<Item = &'a str>,
    ) -> Result<Router, GatewayError> {
        let path = self.shared.settings.path.as_str();
        if RESERVED_PATHS.contains(&path) || mounted.into_iter().any(|p| p == path) {
            return Err(GatewayError::PathConflict { path: path.to_owned() });
        }
        self.transition(
            "create transport",
            &[GatewayState::Uninitialized],
            GatewayState::TransportBound,
        )?;
        info!(path = %self.shared.settings.path, "real-time transport bound");
        Ok(router.route(
            &self.shared.settings.path,
            get(socket::upgrade).with_state(self.clone()),
        ))
    }

    /// Open both broker handles concurrently and install the fan-out adapter
    /// once both are ready.
    ///
    /// If either handle fails (or times out) nothing is installed, the
    /// gateway moves to [`GatewayState::Failed`] and the error is returned.
    /// Only one attach may be in flight; a second call fails with
    /// [`GatewayError::InvalidState`] without touching the broker.
    pub async fn attach_fan_out(
        &self,
        connector: &dyn BrokerConnector,
        address: &str,
        channel: &str,
        open_timeout: Duration,
    ) -> Result<(), GatewayError> {
        self.transition(
            "attach fan-out",
            &[GatewayState::TransportBound],
            GatewayState::Attaching,
        )?;
        let endpoint = redact(address);
        info!(broker = %endpoint, channel, "opening broker handles");

        let timeout_ms = u64::try_from(open_timeout.as_millis()).unwrap_or(u64::MAX);
        let (publisher, subscriber) = tokio::join!(
            tokio::time::timeout(open_timeout, connector.open_publisher(address)),
            tokio::time::timeout(open_timeout, connector.open_subscriber(address)),
        );

        let ready = match (
            flatten("publish", timeout_ms, publisher),
            flatten("subscribe", timeout_ms, subscriber),
        ) {
            (Ok(publisher), Ok(subscriber)) => {
                match tokio::time::timeout(open_timeout, subscriber.subscribe(channel)).await {
                    Ok(Ok(subscription)) => Ok((publisher, subscription)),
                    Ok(Err(source)) => Err(GatewayError::Broker {
                        role: "subscribe",
                        source,
                    }),
                    Err(_) => Err(GatewayError::Broker {
                        role: "subscribe",
                        source: BrokerError::Timeout {
                            role: "subscribe",
                            timeout_ms,
                        },
                    }),
                }
            }
            (Err(e), _) | (_, Err(e)) => Err(e),
        };

        let (publisher, subscription) = match ready {
            Ok(handles) => handles,
            Err(e) => {
                error!(broker = %endpoint, error = %e, "fan-out attach failed");
                let _ = self.transition(
                    "fail fan-out",
                    &[GatewayState::Attaching],
                    GatewayState::Failed,
                );
                return Err(e);
            }
        };

        self.install(publisher, subscription, channel, endpoint)
    }

    fn install(
        &self,
        publisher: Arc<dyn BrokerPublisher>,
        subscription: Subscription,
        channel: &str,
        address: String,
    ) -> Result<(), GatewayError> {
        let adapter = FanOutAdapter {
            publisher,
            channel: channel.to_owned(),
            address,
            relay: Mutex::new(None),
        };
        if self.shared.fan_out.set(adapter).is_err() {
            return Err(GatewayError::InvalidState {
                operation: "attach fan-out",
                actual: self.state(),
            });
        }
        self.transition(
            "attach fan-out",
            &[GatewayState::Attaching],
            GatewayState::FanOutAttached,
        )?;

        let relay = tokio::spawn(relay(
            Arc::clone(&self.shared.broadcast),
            subscription,
            self.shared.instance_id.clone(),
            self.shared.shutdown.child_token(),
        ));
        if let Some(adapter) = self.shared.fan_out.get() {
            *adapter.relay.lock() = Some(relay);
            info!(broker = %adapter.address, channel = %adapter.channel, "fan-out adapter attached");
        }

        self.transition(
            "serve",
            &[GatewayState::FanOutAttached],
            GatewayState::Serving,
        )
    }

    /// Serve local clients only. Valid after the transport is bound, and
    /// after a failed attach (degraded mode).
    pub fn serve_local(&self) -> Result<(), GatewayError> {
        let degraded = self.state() == GatewayState::Failed;
        self.transition(
            "serve locally",
            &[GatewayState::TransportBound, GatewayState::Failed],
            GatewayState::Serving,
        )?;
        if degraded {
            warn!("real-time gateway serving local clients only after broker failure");
        } else {
            info!("real-time gateway serving local clients only");
        }
        Ok(())
    }

    /// Deliver `event` to local clients and, when fan-out is attached, to
    /// every other instance. Returns the number of local deliveries.
    pub async fn emit(&self, event: RealtimeEvent) -> Result<usize, GatewayError> {
        let delivered = self.shared.broadcast.broadcast_all(&event).await;

        let Some(fan_out) = self.shared.fan_out.get() else {
            return Ok(delivered);
        };
        let envelope = FanOutEnvelope {
            origin: self.shared.instance_id.clone(),
            event,
        };
        let payload = envelope.encode()?;
        match fan_out.publisher.publish(&fan_out.channel, payload).await {
            Ok(receivers) => {
                counter!(FANOUT_PUBLISHED_TOTAL).increment(1);
                debug!(
                    event_type = %envelope.event.event_type,
                    receivers,
                    "published fan-out envelope"
                );
                Ok(delivered)
            }
            Err(e) => {
                counter!(FANOUT_ERRORS_TOTAL, "stage" => "publish").increment(1);
                warn!(
                    event_type = %envelope.event.event_type,
                    error = %e,
                    "fan-out publish failed"
                );
                Err(GatewayError::Publish(e))
            }
        }
    }

    /// Stop the relay and close every client connection.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        if let Some(adapter) = self.shared.fan_out.get() {
            if let Some(relay) = adapter.relay.lock().take() {
                relay.abort();
            }
        }
    }
}

impl fmt::Debug for RealtimeGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeGateway")
            .field("instance_id", &self.shared.instance_id)
            .field("state", &self.state())
            .field("fan_out", &self.has_fan_out())
            .finish_non_exhaustive()
    }
}

fn flatten<T>(
    role: &'static str,
    timeout_ms: u64,
    result: Result<Result<T, BrokerError>, tokio::time::error::Elapsed>,
) -> Result<T, GatewayError> {
    match result {
        Ok(Ok(handle)) => Ok(handle),
        Ok(Err(source)) => Err(GatewayError::Broker { role, source }),
        Err(_) => Err(GatewayError::Broker {
            role,
            source: BrokerError::Timeout { role, timeout_ms },
        }),
    }
}

/// Deliver envelopes from other instances to local clients.
async fn relay(
    broadcast: Arc<BroadcastManager>,
    mut subscription: Subscription,
    origin: String,
    cancel: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            payload = subscription.next() => payload,
            () = cancel.cancelled() => return,
        };
        let Some(payload) = payload else {
            warn!(channel = %subscription.channel(), "fan-out subscription ended; remote events will not be delivered");
            return;
        };
        match FanOutEnvelope::decode(&payload) {
            Ok(envelope) if envelope.origin == origin => {}
            Ok(envelope) => {
                counter!(FANOUT_RECEIVED_TOTAL).increment(1);
                let delivered = broadcast.broadcast_all(&envelope.event).await;
                debug!(
                    origin = %envelope.origin,
                    event_type = %envelope.event.event_type,
                    delivered,
                    "relayed remote event"
                );
            }
            Err(e) => {
                counter!(FANOUT_ERRORS_TOTAL, "stage" => "decode").increment(1);
                warn!(error = %e, bytes = payload.len(), "dropping malformed fan-out envelope");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use beacon_broker::{BrokerClient, BrokerSubscriber, MemoryHub};
    use bytes::Bytes;
    use tokio::sync::{Barrier, mpsc};

    use crate::realtime::connection::ClientConnection;
    use crate::realtime::handler::NoopHandler;

    const OPEN: Duration = Duration::from_secs(2);

    fn gateway() -> RealtimeGateway {
        RealtimeGateway::new(
            RealtimeSettings::default(),
            CorsPolicy::permissive(),
            Arc::new(NoopHandler),
        )
    }

    fn bound_gateway() -> RealtimeGateway {
        let gw = gateway();
        let _router = gw.create_transport(Router::new()).unwrap();
        gw
    }

    async fn local_client(gw: &RealtimeGateway, id: &str) -> mpsc::Receiver<Arc<String>> {
        let (tx, rx) = mpsc::channel(16);
        gw.broadcast()
            .add(Arc::new(ClientConnection::new(id.into(), None, tx)))
            .await;
        rx
    }

    async fn next_event(rx: &mut mpsc::Receiver<Arc<String>>) -> serde_json::Value {
        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .unwrap();
        serde_json::from_str(&msg).unwrap()
    }

    /// Connector whose handles succeed or fail on demand. Both opens wait on
    /// a shared barrier, so they only complete if started concurrently.
    struct ScriptedConnector {
        inner: BrokerClient,
        fail_publish: bool,
        fail_subscribe: bool,
        barrier: Barrier,
        opened: AtomicUsize,
    }

    impl ScriptedConnector {
        fn new(fail_publish: bool, fail_subscribe: bool) -> Self {
            Self {
                inner: BrokerClient::new(),
                fail_publish,
                fail_subscribe,
                barrier: Barrier::new(2),
                opened: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BrokerConnector for ScriptedConnector {
        async fn open_publisher(&self, address: &str) -> Result<Arc<dyn BrokerPublisher>, BrokerError> {
            let _ = self.barrier.wait().await;
            if self.fail_publish {
                return Err(BrokerError::Closed);
            }
            let _ = self.opened.fetch_add(1, Ordering::SeqCst);
            self.inner.open_publisher(address).await
        }

        async fn open_subscriber(&self, address: &str) -> Result<Box<dyn BrokerSubscriber>, BrokerError> {
            let _ = self.barrier.wait().await;
            if self.fail_subscribe {
                return Err(BrokerError::Connect {
                    address: address.into(),
                    message: "refused".into(),
                });
            }
            let _ = self.opened.fetch_add(1, Ordering::SeqCst);
            self.inner.open_subscriber(address).await
        }
    }

    #[test]
    fn starts_uninitialized() {
        let gw = gateway();
        assert_eq!(gw.state(), GatewayState::Uninitialized);
        assert!(!gw.has_fan_out());
    }

    #[test]
    fn transport_binds_once() {
        let gw = bound_gateway();
        assert_eq!(gw.state(), GatewayState::TransportBound);
        assert_matches!(
            gw.create_transport(Router::new()),
            Err(GatewayError::InvalidState { actual: GatewayState::TransportBound, .. })
        );
    }

    #[tokio::test]
    async fn attach_requires_bound_transport() {
        let gw = gateway();
        let result = gw
            .attach_fan_out(&BrokerClient::new(), "memory://x", "events", OPEN)
            .await;
        assert_matches!(result, Err(GatewayError::InvalidState { .. }));
        assert_eq!(gw.state(), GatewayState::Uninitialized);
    }

    #[tokio::test]
    async fn both_handles_ready_means_serving() {
        let gw = bound_gateway();
        let connector = ScriptedConnector::new(false, false);
        tokio::time::timeout(OPEN, gw.attach_fan_out(&connector, "memory://one", "events", OPEN))
            .await
            .expect("opens were not concurrent")
            .unwrap();

        assert_eq!(gw.state(), GatewayState::Serving);
        assert!(gw.has_fan_out());
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn subscribe_failure_leaves_adapter_uninstalled() {
        let gw = bound_gateway();
        let connector = ScriptedConnector::new(false, true);
        let result = gw
            .attach_fan_out(&connector, "memory://two", "events", OPEN)
            .await;

        assert_matches!(result, Err(GatewayError::Broker { role: "subscribe", .. }));
        assert_eq!(gw.state(), GatewayState::Failed);
        assert!(!gw.has_fan_out());
    }

    #[tokio::test]
    async fn publish_failure_leaves_adapter_uninstalled() {
        let gw = bound_gateway();
        let connector = ScriptedConnector::new(true, false);
        let result = gw
            .attach_fan_out(&connector, "memory://three", "events", OPEN)
            .await;

        assert_matches!(result, Err(GatewayError::Broker { role: "publish", .. }));
        assert_eq!(gw.state(), GatewayState::Failed);
        assert!(!gw.has_fan_out());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_open_times_out() {
        struct Hang;
        #[async_trait]
        impl BrokerConnector for Hang {
            async fn open_publisher(&self, _: &str) -> Result<Arc<dyn BrokerPublisher>, BrokerError> {
                std::future::pending().await
            }
            async fn open_subscriber(&self, _: &str) -> Result<Box<dyn BrokerSubscriber>, BrokerError> {
                std::future::pending().await
            }
        }

        let gw = bound_gateway();
        let result = gw
            .attach_fan_out(&Hang, "memory://hang", "events", Duration::from_millis(100))
            .await;
        assert_matches!(
            result,
            Err(GatewayError::Broker {
                source: BrokerError::Timeout { timeout_ms: 100, .. },
                ..
            })
        );
        assert_eq!(gw.state(), GatewayState::Failed);
    }

    #[tokio::test]
    async fn failed_gateway_degrades_to_local() {
        let gw = bound_gateway();
        let _ = gw
            .attach_fan_out(&ScriptedConnector::new(true, true), "memory://four", "events", OPEN)
            .await;
        gw.serve_local().unwrap();
        assert_eq!(gw.state(), GatewayState::Serving);

        let mut rx = local_client(&gw, "c1").await;
        let delivered = gw.emit(RealtimeEvent::new("local.only", None)).await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(next_event(&mut rx).await["type"], "local.only");
    }

    /// Opens fail after a delay.
    struct SlowFail;

    #[async_trait]
    impl BrokerConnector for SlowFail {
        async fn open_publisher(&self, _: &str) -> Result<Arc<dyn BrokerPublisher>, BrokerError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(BrokerError::Closed)
        }
        async fn open_subscriber(&self, _: &str) -> Result<Box<dyn BrokerSubscriber>, BrokerError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(BrokerError::Closed)
        }
    }

    #[tokio::test]
    async fn overlapping_attach_is_refused_while_failing_one_runs() {
        let gw = bound_gateway();
        let good = BrokerClient::new();
        let (slow, fast) = tokio::join!(
            gw.attach_fan_out(&SlowFail, "memory://slow", "events", OPEN),
            gw.attach_fan_out(&good, "memory://fast", "events", OPEN),
        );

        assert_matches!(slow, Err(GatewayError::Broker { .. }));
        assert_matches!(
            fast,
            Err(GatewayError::InvalidState { actual: GatewayState::Attaching, .. })
        );
        assert_eq!(gw.state(), GatewayState::Failed);
        assert!(!gw.has_fan_out());
    }

    #[tokio::test]
    async fn late_failing_attach_cannot_undo_serving() {
        let gw = bound_gateway();
        let good = BrokerClient::new();
        let (fast, slow) = tokio::join!(
            gw.attach_fan_out(&good, "memory://fast", "events", OPEN),
            gw.attach_fan_out(&SlowFail, "memory://slow", "events", OPEN),
        );

        fast.unwrap();
        assert_matches!(slow, Err(GatewayError::InvalidState { .. }));
        assert_eq!(gw.state(), GatewayState::Serving);
        assert!(gw.has_fan_out());
    }

    #[test]
    fn reserved_path_is_refused() {
        for path in RESERVED_PATHS {
            let gw = RealtimeGateway::new(
                RealtimeSettings {
                    path: (*path).to_string(),
                    ..RealtimeSettings::default()
                },
                CorsPolicy::permissive(),
                Arc::new(NoopHandler),
            );
            let result = gw.create_transport(Router::new());
            assert_matches!(result, Err(GatewayError::PathConflict { path: p }) if p == *path);
            assert_eq!(gw.state(), GatewayState::Uninitialized);
        }
    }

    #[test]
    fn mounted_path_is_refused() {
        let gw = gateway();
        let router = Router::new().route("/ws", get(|| async { "taken" }));
        assert_matches!(
            gw.create_transport_beside(router, ["/ws"]),
            Err(GatewayError::PathConflict { .. })
        );
        assert_eq!(gw.state(), GatewayState::Uninitialized);
    }

    #[test]
    fn serve_local_requires_transport() {
        let gw = gateway();
        assert_matches!(gw.serve_local(), Err(GatewayError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn events_cross_instances_sharing_a_broker() {
        let hub = MemoryHub::new();
        let connector = BrokerClient::with_hub(hub);
        let a = bound_gateway();
        let b = bound_gateway();
        a.attach_fan_out(&connector, "memory://cluster", "beacon#events", OPEN)
            .await
            .unwrap();
        b.attach_fan_out(&connector, "memory://cluster", "beacon#events", OPEN)
            .await
            .unwrap();
        assert_eq!(a.state(), GatewayState::Serving);
        assert_eq!(b.state(), GatewayState::Serving);

        let mut on_a = local_client(&a, "a1").await;
        let mut on_b = local_client(&b, "b1").await;

        let event = RealtimeEvent::new("chat.message", Some(serde_json::json!({"text": "hi"})));
        let delivered = a.emit(event).await.unwrap();
        assert_eq!(delivered, 1);

        let remote = next_event(&mut on_b).await;
        assert_eq!(remote["type"], "chat.message");
        assert_eq!(remote["data"]["text"], "hi");

        // the origin instance delivers locally once and skips its own echo
        assert_eq!(next_event(&mut on_a).await["type"], "chat.message");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(on_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_envelopes_are_dropped() {
        let hub = MemoryHub::new();
        let connector = BrokerClient::with_hub(hub.clone());
        let gw = bound_gateway();
        gw.attach_fan_out(&connector, "memory://noise", "events", OPEN)
            .await
            .unwrap();
        let mut rx = local_client(&gw, "c1").await;

        let raw = hub.publisher("noise");
        let _ = raw.publish("events", Bytes::from_static(b"garbage")).await.unwrap();
        let good = FanOutEnvelope {
            origin: "someone-else".into(),
            event: RealtimeEvent::new("after.garbage", None),
        };
        let _ = raw.publish("events", good.encode().unwrap()).await.unwrap();

        assert_eq!(next_event(&mut rx).await["type"], "after.garbage");
    }

    #[tokio::test]
    async fn shutdown_stops_relay() {
        let connector = BrokerClient::new();
        let gw = bound_gateway();
        gw.attach_fan_out(&connector, "memory://stop", "events", OPEN)
            .await
            .unwrap();
        gw.shutdown();
        assert!(gw.shared.shutdown.is_cancelled());
        let relay = gw.shared.fan_out.get().unwrap().relay.lock().take();
        assert!(relay.is_none());
    }

    #[test]
    fn state_names() {
        assert_eq!(GatewayState::FanOutAttached.to_string(), "fan_out_attached");
        assert_eq!(GatewayState::Attaching.to_string(), "attaching");
        assert_eq!(
            serde_json::to_value(GatewayState::TransportBound).unwrap(),
            "transport_bound"
        );
    }
}
