//! # beacon-logging
//!
//! Structured logging for the Beacon server.
//!
//! - [`init_subscriber`] installs the process-wide `tracing` subscriber
//!   (stderr, compact or JSON). The binary calls it once after settings load.
//! - [`capture_logs`] installs a thread-local capture layer so tests can
//!   assert on emitted events without touching the global subscriber.
//!
//! Components never reach for a logger instance; they emit through the
//! `tracing` macros and carry context in structured fields.

#![deny(unsafe_code)]

pub mod test_utils;

pub use beacon_settings::LogFormat;
pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `level` when set. Subsequent calls are
/// no-ops.
pub fn init_subscriber(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails only when a global subscriber is already installed
    let _ = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .try_init(),
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
