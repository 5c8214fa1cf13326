//! Broker error types.

use thiserror::Error;

/// Wire-level RESP failures.
#[derive(Debug, Error)]
pub enum RespError {
    /// Socket I/O failed.
    #[error("broker I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The peer sent bytes that are not valid RESP.
    #[error("malformed RESP frame: {0}")]
    Malformed(String),
    /// A frame exceeded the configured maximum.
    #[error("RESP frame exceeds {max} bytes")]
    TooLarge {
        /// Configured maximum frame size.
        max: usize,
    },
}

/// Errors from opening or using a broker handle.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The configured address could not be parsed.
    #[error("invalid broker address '{address}': {reason}")]
    InvalidAddress {
        /// The address as configured.
        address: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The broker could not be reached.
    #[error("failed to connect to broker at {address}: {message}")]
    Connect {
        /// Target endpoint.
        address: String,
        /// Underlying failure.
        message: String,
    },
    /// Opening a handle did not complete in time.
    #[error("opening broker {role} handle timed out after {timeout_ms}ms")]
    Timeout {
        /// `"publish"` or `"subscribe"`.
        role: &'static str,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },
    /// The broker answered a command with an error reply.
    #[error("broker rejected {command}: {message}")]
    Rejected {
        /// Command that was rejected.
        command: &'static str,
        /// Error reply text.
        message: String,
    },
    /// The broker answered with an unexpected reply shape.
    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply {
        /// Command that was sent.
        command: &'static str,
        /// Debug rendering of the reply.
        reply: String,
    },
    /// The connection closed.
    #[error("broker connection closed")]
    Closed,
    /// Wire-level failure.
    #[error(transparent)]
    Resp(#[from] RespError),
}

impl BrokerError {
    /// Short machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAddress { .. } => "INVALID_ADDRESS",
            Self::Connect { .. } => "CONNECT_FAILED",
            Self::Timeout { .. } => "OPEN_TIMEOUT",
            Self::Rejected { .. } => "REJECTED",
            Self::UnexpectedReply { .. } => "UNEXPECTED_REPLY",
            Self::Closed => "CLOSED",
            Self::Resp(_) => "PROTOCOL_ERROR",
        }
    }
}
