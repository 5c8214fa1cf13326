//! Graceful shutdown coordination via `CancellationToken`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default timeout for graceful shutdown before abandoning tasks.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit code for a clean stop.
pub const EXIT_OK: u8 = 0;
/// Exit code for an unrecoverable startup failure.
pub const EXIT_FATAL: u8 = 1;

/// Coordinates graceful shutdown across all server tasks and remembers
/// why the process is stopping.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    exit_code: AtomicU8,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            exit_code: AtomicU8::new(EXIT_OK),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate a clean shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Initiate shutdown because of an unrecoverable failure. The process
    /// exits with [`EXIT_FATAL`].
    pub fn fail(&self, reason: &str) {
        error!(reason, "fatal error, shutting down");
        self.exit_code.store(EXIT_FATAL, Ordering::SeqCst);
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Exit code the process should end with.
    pub fn exit_code(&self) -> u8 {
        self.exit_code.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been initiated.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    /// Perform a graceful shutdown of all tracked tasks.
    ///
    /// 1. Cancel the shutdown token (signals all tasks)
    /// 2. Wait up to `timeout` for all handles to complete
    /// 3. Leave any stragglers behind after the timeout
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        info!(
            task_count = handles.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "waiting for tasks to complete"
        );

        let drain = futures::future::join_all(handles);

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
