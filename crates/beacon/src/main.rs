//! # beacon
//!
//! Beacon server binary: loads settings, supervises the store connection,
//! and serves HTTP and real-time traffic on one listener.
//!
//! Exits `0` after a clean shutdown and `1` when the store cannot be reached
//! at startup or the listener cannot be bound. Nothing is served before the
//! first store attempt succeeds.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use beacon_broker::BrokerClient;
use beacon_server::pipeline::{PipelineBuilder, PipelineOptions};
use beacon_server::realtime::NoopHandler;
use beacon_server::shutdown::{EXIT_FATAL, ShutdownCoordinator};
use beacon_server::{BeaconServer, RealtimeGateway};
use beacon_settings::{BeaconSettings, LogFormat, load_settings_from_path, settings_path};
use beacon_store::{StoreConnector, StoreSupervisor, TcpStoreConnector};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Beacon server.
#[derive(Parser, Debug)]
#[command(name = "beacon", version, about = "Beacon HTTP and real-time server")]
struct Cli {
    /// Settings file (defaults to `~/.beacon/settings.json`).
    #[arg(long, env = "BEACON_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Store address.
    #[arg(long)]
    store_url: Option<String>,

    /// Broker address. Enables cross-instance fan-out.
    #[arg(long)]
    broker_url: Option<String>,

    /// Log filter directive, e.g. `info` or `beacon_server=debug`.
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format.
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    LogFormat::parse(value).ok_or_else(|| format!("unknown log format '{value}' (expected compact or json)"))
}

impl Cli {
    /// Settings file, then `BEACON_*` env, then flags.
    fn load_settings(&self) -> Result<BeaconSettings> {
        let path = self.config.clone().unwrap_or_else(settings_path);
        let mut settings = load_settings_from_path(&path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?;
        self.apply(&mut settings);
        settings.validate().context("invalid command-line override")?;
        Ok(settings)
    }

    fn apply(&self, settings: &mut BeaconSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(url) = &self.store_url {
            settings.store.address.clone_from(url);
        }
        if let Some(url) = &self.broker_url {
            settings.broker.address = Some(url.clone());
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = match cli.load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            // logging is configured by these settings, so report directly
            eprintln!("beacon: {e:#}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    beacon_logging::init_subscriber(&settings.logging.level, settings.logging.format);

    match run(settings).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %format!("{e:#}"), "beacon failed");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(settings: BeaconSettings) -> Result<u8> {
    let metrics = match beacon_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };
    let store = StoreSupervisor::new(TcpStoreConnector, &settings.store);
    serve(settings, store, metrics, wait_for_signal()).await
}

/// Start the store, gateway, and listener, then serve until `stop`
/// resolves or the store fails fatally. Returns the process exit code.
async fn serve<C: StoreConnector>(
    settings: BeaconSettings,
    store: StoreSupervisor<C>,
    metrics: Option<PrometheusHandle>,
    stop: impl Future<Output = ()>,
) -> Result<u8> {
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let options = PipelineOptions::from_settings(&settings.security);
    let cors = options.cors.clone();
    let pipeline = PipelineBuilder::new(options);

    // Store: the initial attempt runs alongside the rest of startup
    let store_ready = {
        let store = store.clone();
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            if let Err(e) = store.start().await {
                coordinator.fail(&format!("store unreachable at startup: {e}"));
            }
        })
    };

    let gateway = RealtimeGateway::new(settings.realtime.clone(), cors, Arc::new(NoopHandler));
    let mut server = BeaconServer::new(pipeline, gateway.clone(), store.subscribe_state());
    if let Some(handle) = metrics {
        server = server.with_metrics(handle);
    }
    let router = server.router().context("failed to build router")?;

    match &settings.broker.address {
        Some(address) => {
            let open_timeout = Duration::from_millis(settings.broker.open_timeout_ms);
            if let Err(e) = gateway
                .attach_fan_out(&BrokerClient::new(), address, &settings.broker.channel, open_timeout)
                .await
            {
                warn!(error = %e, "continuing without cross-instance fan-out");
                gateway.serve_local()?;
            }
        }
        None => gateway.serve_local()?,
    }

    // no traffic is accepted until the initial store attempt has resolved
    if let Err(e) = store_ready.await {
        coordinator.fail(&format!("store startup task failed: {e}"));
    }
    if coordinator.is_shutting_down() {
        gateway.shutdown();
        store.shutdown();
        return Ok(coordinator.exit_code());
    }

    let bind_addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            coordinator.fail(&format!("failed to bind {bind_addr}: {e}"));
            gateway.shutdown();
            store.shutdown();
            return Ok(coordinator.exit_code());
        }
    };
    let (addr, server_task) =
        BeaconServer::serve(listener, router, gateway.clone(), coordinator.token())
            .context("failed to read listener address")?;
    info!(%addr, gateway = %gateway.state(), "server listening");

    tokio::select! {
        () = stop => info!("shutdown signal received"),
        () = coordinator.wait() => {}
    }

    info!("shutting down");
    store.shutdown();
    coordinator
        .graceful_shutdown(
            vec![server_task],
            Some(Duration::from_millis(settings.server.shutdown_timeout_ms)),
        )
        .await;
    info!(exit_code = coordinator.exit_code(), "shutdown complete");
    Ok(coordinator.exit_code())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                let _ = signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
