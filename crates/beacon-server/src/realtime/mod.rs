//! Real-time gateway: WebSocket clients on the HTTP listener, with optional
//! cross-instance fan-out through a publish/subscribe broker.

pub mod broadcast;
pub mod connection;
pub mod event;
pub mod gateway;
pub mod handler;
pub mod heartbeat;
mod socket;

pub use broadcast::BroadcastManager;
pub use connection::ClientConnection;
pub use event::{FanOutEnvelope, RealtimeEvent};
pub use gateway::{GatewayError, GatewayState, RealtimeGateway};
pub use handler::{ConnectionHandler, NoopHandler};
