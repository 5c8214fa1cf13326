//! HTTP server assembly: routes and the real-time transport behind the
//! request pipeline, served on one listener.

use std::net::SocketAddr;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{MethodRouter, get};
use axum::Json;
use beacon_settings::RESERVED_PATHS;
use beacon_store::ConnectionState;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::health::{HealthResponse, health_check};
use crate::pipeline::PipelineBuilder;
use crate::realtime::{GatewayError, RealtimeGateway};

/// State shared by the built-in routes.
#[derive(Clone)]
pub struct AppState {
    start_time: Instant,
    store: watch::Receiver<ConnectionState>,
    gateway: RealtimeGateway,
    metrics: Option<PrometheusHandle>,
}

/// The assembled HTTP server.
pub struct BeaconServer {
    pipeline: PipelineBuilder,
    state: AppState,
    extra: Router,
    extra_paths: Vec<String>,
}

impl BeaconServer {
    /// Server over an existing gateway. `store` tracks the supervised store
    /// connection for `/health`.
    pub fn new(
        pipeline: PipelineBuilder,
        gateway: RealtimeGateway,
        store: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            pipeline,
            state: AppState {
                start_time: Instant::now(),
                store,
                gateway,
                metrics: None,
            },
            extra: Router::new(),
            extra_paths: Vec::new(),
        }
    }

    /// Expose Prometheus metrics at `/metrics`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Add an application route. It runs behind the same pipeline.
    ///
    /// Paths already taken by a built-in route or the real-time transport
    /// make [`router`](Self::router) fail.
    #[must_use]
    pub fn with_route(mut self, path: &str, route: MethodRouter) -> Self {
        if !RESERVED_PATHS.contains(&path) && !self.extra_paths.iter().any(|p| p == path) {
            self.extra = self.extra.route(path, route);
        }
        self.extra_paths.push(path.to_owned());
        self
    }

    /// The real-time gateway.
    pub fn gateway(&self) -> &RealtimeGateway {
        &self.state.gateway
    }

    /// Build the full router: routes, the real-time transport, then every
    /// pipeline stage around both. Binds the gateway transport, so it can
    /// only be called once per gateway.
    pub fn router(&self) -> Result<Router, GatewayError> {
        if let Some(path) = self.duplicate_path() {
            return Err(GatewayError::PathConflict { path: path.to_owned() });
        }
        let mut routes = Router::new().route("/health", get(health));
        if self.state.metrics.is_some() {
            routes = routes.route("/metrics", get(render_metrics));
        }
        let routes = routes.with_state(self.state.clone()).merge(self.extra.clone());

        let mounted = self.extra_paths.iter().map(String::as_str);
        let routes = self.state.gateway.create_transport_beside(routes, mounted)?;
        Ok(self.pipeline.build(routes))
    }

    /// First application path that is reserved or added twice.
    fn duplicate_path(&self) -> Option<&str> {
        self.extra_paths.iter().enumerate().find_map(|(i, path)| {
            let repeated = self.extra_paths[..i].contains(path);
            (repeated || RESERVED_PATHS.contains(&path.as_str())).then_some(path.as_str())
        })
    }

    /// Serve `router` on `listener` until `shutdown` fires. Returns the bound
    /// address and the serving task.
    pub fn serve(
        listener: TcpListener,
        router: Router,
        gateway: RealtimeGateway,
        shutdown: CancellationToken,
    ) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            let signal = {
                let shutdown = shutdown.clone();
                let gateway = gateway.clone();
                async move {
                    shutdown.cancelled().await;
                    gateway.shutdown();
                }
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(signal)
                .await
            {
                error!(error = %e, "http server failed");
            }
            info!("http server stopped");
        });
        Ok((addr, handle))
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = *state.store.borrow();
    let connections = state.gateway.broadcast().connection_count().await;
    Json(health_check(
        state.start_time,
        store,
        state.gateway.state(),
        connections,
    ))
}

async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(crate::metrics::render)
        .unwrap_or_default();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

impl std::fmt::Debug for BeaconServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeaconServer")
            .field("stages", &self.pipeline.stages())
            .field("gateway", &self.state.gateway)
            .finish_non_exhaustive()
    }
}
