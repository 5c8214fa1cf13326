//! # beacon-store
//!
//! Lifecycle supervision for the persistent store connection.
//!
//! - [`StoreSupervisor`]: idempotent start, fatal initial failure,
//!   unlimited reconnection after a post-startup disconnect
//! - [`StoreConnector`]: the seam between the supervisor and a concrete
//!   transport; [`TcpStoreConnector`] is the production implementation
//! - [`DisconnectNotifier`]: handed to each established link so its watcher
//!   can report a drop back to the supervisor
//!
//! Only connection outcomes and disconnects are observed here.
//! Query shape and schema belong to the layers above.

#![deny(unsafe_code)]

pub mod backoff;
pub mod connector;
pub mod errors;
pub mod state;
pub mod supervisor;
pub mod tcp;

pub use backoff::ReconnectPolicy;
pub use connector::{DisconnectNotifier, StoreConnector};
pub use errors::StoreError;
pub use state::ConnectionState;
pub use supervisor::{StoreStats, StoreSupervisor};
pub use tcp::{StoreEndpoint, TcpLink, TcpStoreConnector};
