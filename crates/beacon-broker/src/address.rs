//! Broker address parsing.

use std::fmt;

use crate::errors::BrokerError;

/// Default RESP port.
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// A parsed broker address.
#[derive(Clone, PartialEq, Eq)]
pub enum BrokerAddress {
    /// In-process hub identified by name.
    Memory {
        /// Hub name.
        name: String,
    },
    /// RESP server over TCP.
    Redis {
        /// Hostname or IP literal.
        host: String,
        /// TCP port.
        port: u16,
        /// ACL username, sent with `AUTH` when present.
        username: Option<String>,
        /// Password for `AUTH`.
        password: Option<String>,
        /// Logical database selected after connecting.
        db: Option<u32>,
    },
}

impl BrokerAddress {
    /// Parse `memory://<name>` or `redis://[[user]:password@]host[:port][/db]`.
    pub fn parse(address: &str) -> Result<Self, BrokerError> {
        let invalid = |reason: &str| BrokerError::InvalidAddress {
            address: redact(address),
            reason: reason.to_string(),
        };

        let (scheme, rest) = address
            .trim()
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;

        match scheme.to_ascii_lowercase().as_str() {
            "memory" => {
                let name = rest.trim_end_matches('/');
                if name.is_empty() {
                    return Err(invalid("missing hub name"));
                }
                Ok(Self::Memory {
                    name: name.to_string(),
                })
            }
            "redis" => {
                let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
                let (userinfo, hostport) = match authority.rsplit_once('@') {
                    Some((u, h)) => (Some(u), h),
                    None => (None, authority),
                };

                let (username, password) = match userinfo {
                    None => (None, None),
                    Some(info) => match info.split_once(':') {
                        Some((user, pass)) => (
                            (!user.is_empty()).then(|| user.to_string()),
                            Some(pass.to_string()),
                        ),
                        None => (None, Some(info.to_string())),
                    },
                };

                let (host, port) = match hostport.rsplit_once(':') {
                    Some((h, p)) => (
                        h,
                        p.parse::<u16>().map_err(|_| invalid("invalid port"))?,
                    ),
                    None => (hostport, DEFAULT_REDIS_PORT),
                };
                if host.is_empty() {
                    return Err(invalid("missing host"));
                }

                let db = match path.trim_matches('/') {
                    "" => None,
                    n => Some(n.parse::<u32>().map_err(|_| invalid("invalid database index"))?),
                };

                Ok(Self::Redis {
                    host: host.to_string(),
                    port,
                    username,
                    password,
                    db,
                })
            }
            _ => Err(invalid("unsupported scheme")),
        }
    }
}

/// Replace any password in an address with `***` for logging.
pub fn redact(address: &str) -> String {
    let Some((scheme, rest)) = address.split_once("://") else {
        return address.to_string();
    };
    let (authority, path) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    match authority.rsplit_once('@') {
        Some((info, host)) => {
            let user = info.split_once(':').map_or("", |(u, _)| u);
            format!("{scheme}://{user}:***@{host}{path}")
        }
        None => address.to_string(),
    }
}

impl fmt::Debug for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string())
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory { name } => write!(f, "memory://{name}"),
            Self::Redis { host, port, .. } => write!(f, "redis://{host}:{port}"),
        }
    }
}
