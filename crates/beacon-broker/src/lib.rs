//! # beacon-broker
//!
//! Publish/subscribe broker clients used for cross-instance fan-out.
//!
//! A fan-out adapter needs two independently owned handles to the same
//! broker: one that publishes and one that subscribes. [`BrokerConnector`]
//! opens each role separately so callers can open both concurrently.
//!
//! Supported addresses (see [`BrokerAddress`]):
//!
//! - `memory://<name>`: in-process hub, shared by every handle opened
//!   through the same [`BrokerClient`]
//! - `redis://[[user]:password@]host[:port][/db]`: RESP over TCP
//!   (`AUTH`, `SELECT`, `PING`, `PUBLISH`, `SUBSCRIBE`)
//!
//! Reconnection of a lost broker link is not attempted here; a closed
//! [`Subscription`] simply ends.

#![deny(unsafe_code)]

pub mod address;
pub mod client;
pub mod errors;
pub mod handle;
pub mod memory;
pub mod resp;

pub use address::BrokerAddress;
pub use client::BrokerClient;
pub use errors::{BrokerError, RespError};
pub use handle::{BrokerConnector, BrokerPublisher, BrokerSubscriber, Subscription};
pub use memory::MemoryHub;
