//! # beacon-server
//!
//! HTTP and real-time serving for Beacon.
//!
//! - [`pipeline`]: ordered request stages with validated phase ordering and
//!   a mandatory catch-all and error classifier at the end
//! - [`errors`]: classified request errors and the JSON error body
//! - [`realtime`]: WebSocket gateway sharing the HTTP listener, with
//!   optional broker fan-out across instances
//! - [`server`]: route assembly and the serving task
//! - [`health`], [`metrics`], [`shutdown`]: operational plumbing

#![deny(unsafe_code)]

pub mod errors;
pub mod health;
pub mod metrics;
pub mod pipeline;
pub mod realtime;
pub mod server;
pub mod shutdown;

pub use errors::{ApiError, ErrorBody};
pub use pipeline::{PipelineBuilder, PipelineError, PipelineOptions, PipelineStage};
pub use realtime::{GatewayError, GatewayState, RealtimeEvent, RealtimeGateway};
pub use server::BeaconServer;
pub use shutdown::ShutdownCoordinator;
