//! # beacon-settings
//!
//! Configuration management with layered sources for the Beacon server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`BeaconSettings::default()`]
//! 2. **Settings file**: `~/.beacon/settings.json` or `--config` (deep-merged over defaults)
//! 3. **Environment variables**: `BEACON_*` overrides (highest priority)
//!
//! There is no global instance. The bootstrap loads a [`BeaconSettings`]
//! once and hands the relevant section to each component it constructs.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
