//! Heartbeat liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::connection::ClientConnection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Consecutive silent ticks tolerated before the client is considered gone.
pub fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    u32::try_from(timeout.as_millis() / interval_ms)
        .unwrap_or(u32::MAX)
        .max(1)
}

/// Watch a connection's alive flag.
///
/// The socket writer pings the client every `interval`; the reader marks the
/// connection alive on any inbound frame. Here, each tick consumes the alive
/// flag. After [`max_missed`] silent ticks in a row the loop returns
/// [`HeartbeatResult::TimedOut`].
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval_at(time::Instant::now() + interval, interval);
    check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let max_missed = max_missed(interval, timeout);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}
