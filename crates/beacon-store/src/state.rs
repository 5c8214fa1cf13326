//! Store connection state.

use std::fmt;

use serde::Serialize;

/// Lifecycle state of the store connection.
///
/// `Disconnected → Connecting` on start or on a disconnect notification,
/// `Connecting → Connected` on a successful handshake, and
/// `Connecting → Disconnected` on failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No link is established.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// A link is established and healthy.
    Connected,
}

impl ConnectionState {
    /// Lowercase name used in logs and health output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }

    /// Whether a link is currently established.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
