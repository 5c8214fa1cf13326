//! Store connection errors.

use thiserror::Error;

/// Errors surfaced by store connection attempts.
///
/// `Clone` so a single initial-attempt outcome can be shared by every
/// concurrent caller of [`StoreSupervisor::start`](crate::StoreSupervisor::start).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The configured address could not be parsed.
    #[error("invalid store address '{address}': {reason}")]
    InvalidAddress {
        /// The address as configured.
        address: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The transport refused or failed the connection.
    #[error("failed to connect to {address}: {message}")]
    Connect {
        /// Target address.
        address: String,
        /// Underlying failure.
        message: String,
    },
    /// The attempt did not complete within the connect timeout.
    #[error("connection to {address} timed out after {timeout_ms}ms")]
    Timeout {
        /// Target address.
        address: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },
    /// The supervisor was shut down.
    #[error("store supervisor is shut down")]
    ShutDown,
}

impl StoreError {
    /// Short machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAddress { .. } => "INVALID_ADDRESS",
            Self::Connect { .. } => "CONNECT_FAILED",
            Self::Timeout { .. } => "CONNECT_TIMEOUT",
            Self::ShutDown => "SHUT_DOWN",
        }
    }
}
