//! TCP store connector.
//!
//! Resolves a store address, opens a socket, and watches it: when the peer
//! closes the connection or the socket errors, the link's
//! [`DisconnectNotifier`] fires. Dropping the [`TcpLink`] stops the watcher
//! without notifying.

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::connector::{DisconnectNotifier, StoreConnector};
use crate::errors::StoreError;

/// Host and port extracted from a store address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreEndpoint {
    /// Hostname or IP literal (IPv6 without brackets).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl StoreEndpoint {
    /// Parse `scheme://[user[:pass]@]host[:port][,host2...][/db][?opts]` or
    /// bare `host:port`.
    ///
    /// For multi-host seed lists only the first host is used. A missing port
    /// defaults to 27017 for `mongodb://` and is an error otherwise.
    pub fn parse(address: &str) -> Result<Self, StoreError> {
        let invalid = |reason: &str| StoreError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = address.trim();
        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
            None => (None, trimmed),
        };

        let authority = rest.split(['/', '?']).next().unwrap_or_default();
        let hosts = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
        let first = hosts.split(',').next().unwrap_or_default();
        if first.is_empty() {
            return Err(invalid("missing host"));
        }

        let default_port = match scheme.as_deref() {
            Some("mongodb") => Some(27017),
            _ => None,
        };

        let (host, port) = if let Some(bracketed) = first.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            let port = match tail.strip_prefix(':') {
                Some(p) => Some(p),
                None if tail.is_empty() => None,
                None => return Err(invalid("unexpected text after IPv6 literal")),
            };
            (host, port)
        } else {
            match first.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (first, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| invalid("invalid port"))?,
            None => default_port.ok_or_else(|| invalid("missing port"))?,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for StoreEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// An established TCP link to the store.
pub struct TcpLink {
    peer: SocketAddr,
    generation: u64,
    watcher: JoinHandle<()>,
}

impl TcpLink {
    /// Remote address of the link.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Generation assigned by the supervisor.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for TcpLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpLink")
            .field("peer", &self.peer)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Connects to the store over plain TCP.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpStoreConnector;

#[async_trait]
impl StoreConnector for TcpStoreConnector {
    type Link = TcpLink;

    async fn connect(
        &self,
        address: &str,
        notifier: DisconnectNotifier,
    ) -> Result<TcpLink, StoreError> {
        let endpoint = StoreEndpoint::parse(address)?;
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| StoreError::Connect {
                address: endpoint.to_string(),
                message: e.to_string(),
            })?;
        let _ = stream.set_nodelay(true);
        let peer = stream.peer_addr().map_err(|e| StoreError::Connect {
            address: endpoint.to_string(),
            message: e.to_string(),
        })?;

        let generation = notifier.generation();
        debug!(%peer, generation, "store socket established");
        let watcher = tokio::spawn(watch_socket(stream, peer, notifier));
        Ok(TcpLink {
            peer,
            generation,
            watcher,
        })
    }
}

/// Read until EOF or error, discarding anything the peer sends, then notify.
async fn watch_socket(mut stream: TcpStream, peer: SocketAddr, notifier: DisconnectNotifier) {
    let mut buf = [0u8; 512];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                warn!(%peer, generation = notifier.generation(), "store closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(%peer, generation = notifier.generation(), error = %e, "store socket error");
                break;
            }
        }
    }
    notifier.notify();
}
