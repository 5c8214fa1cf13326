//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` for the JSON file
//! format. Each type implements [`Default`] with production default values,
//! and `#[serde(default)]` allows partial JSON; missing fields get their
//! default value during deserialization.

mod logging;
mod security;
mod server;

pub use logging::*;
pub use security::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the Beacon server.
///
/// # JSON Format
///
/// ```json
/// {
///   "server": { "port": 8080 },
///   "store": { "address": "mongodb://db:27017/app" },
///   "broker": { "address": "redis://cache:6379" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeaconSettings {
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Persistent store connection settings.
    pub store: StoreSettings,
    /// Publish/subscribe broker settings.
    pub broker: BrokerSettings,
    /// Real-time transport settings.
    pub realtime: RealtimeSettings,
    /// Request pipeline security and normalization settings.
    pub security: SecuritySettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl BeaconSettings {
    /// Check cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.store.address.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "store.address must not be empty".into(),
            ));
        }
        if self.store.reconnect_base_delay_ms > self.store.reconnect_max_delay_ms {
            return Err(SettingsError::InvalidValue(format!(
                "store.reconnectBaseDelayMs ({}) exceeds store.reconnectMaxDelayMs ({})",
                self.store.reconnect_base_delay_ms, self.store.reconnect_max_delay_ms
            )));
        }
        if self.broker.address.as_deref().is_some_and(|a| a.trim().is_empty()) {
            return Err(SettingsError::InvalidValue(
                "broker.address must not be empty when set".into(),
            ));
        }
        if self.broker.channel.is_empty() {
            return Err(SettingsError::InvalidValue(
                "broker.channel must not be empty".into(),
            ));
        }
        if !self.realtime.path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "realtime.path must start with '/': {}",
                self.realtime.path
            )));
        }
        if RESERVED_PATHS.contains(&self.realtime.path.as_str()) {
            return Err(SettingsError::InvalidValue(format!(
                "realtime.path {} is reserved for a built-in route",
                self.realtime.path
            )));
        }
        if self.security.body_limit_bytes == 0 {
            return Err(SettingsError::InvalidValue(
                "security.bodyLimitBytes must be positive".into(),
            ));
        }
        if self.security.session.cookie_name.is_empty() {
            return Err(SettingsError::InvalidValue(
                "security.session.cookieName must not be empty".into(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
