//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BeaconSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate cross-field invariants
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{BeaconSettings, LogFormat};

/// Resolve the path to the default settings file (`~/.beacon/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".beacon").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BeaconSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, defaults are used. If the file contains
/// invalid JSON, or the merged result fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<BeaconSettings> {
    let defaults = serde_json::to_value(BeaconSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: BeaconSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (falling back to file/default).
pub fn apply_env_overrides(settings: &mut BeaconSettings) {
    // ── Listener ────────────────────────────────────────────────────
    if let Some(v) = read_env_string("BEACON_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("BEACON_PORT", 0, 65535) {
        settings.server.port = v;
    }

    // ── Store / broker ──────────────────────────────────────────────
    if let Some(v) = read_env_string("BEACON_STORE_URL") {
        settings.store.address = v;
    }
    if let Some(v) = read_env_u64("BEACON_STORE_CONNECT_TIMEOUT_MS", 100, 600_000) {
        settings.store.connect_timeout_ms = v;
    }
    if let Some(v) = read_env_string("BEACON_BROKER_URL") {
        settings.broker.address = Some(v);
    }
    if let Some(v) = read_env_string("BEACON_BROKER_CHANNEL") {
        settings.broker.channel = v;
    }

    // ── Real-time transport ─────────────────────────────────────────
    if let Some(v) = read_env_string("BEACON_WS_PATH") {
        settings.realtime.path = v;
    }
    if let Some(v) = read_env_usize("BEACON_WS_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.realtime.max_connections = v;
    }

    // ── Pipeline ────────────────────────────────────────────────────
    if let Some(v) = read_env_string("BEACON_CORS_ORIGINS") {
        settings.security.cors.origins = parse_list(&v);
    }
    if let Some(v) = read_env_usize("BEACON_BODY_LIMIT", 1, 1_073_741_824) {
        settings.security.body_limit_bytes = v;
    }
    if let Some(v) = read_env_bool("BEACON_COMPRESSION") {
        settings.security.compression = v;
    }
    if let Some(v) = read_env_bool("BEACON_SESSION_SECURE") {
        settings.security.session.secure = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("BEACON_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("BEACON_LOG_FORMAT") {
        match LogFormat::parse(&v) {
            Some(format) => settings.logging.format = format,
            None => tracing::warn!(key = "BEACON_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated list, trimming blanks.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({
            "server": {"port": 4000, "host": "0.0.0.0"}
        });
        let source = serde_json::json!({
            "server": {"port": 9090}
        });
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"origins": ["a", "b", "c"]});
        let source = serde_json::json!({"origins": ["d"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["origins"], serde_json::json!(["d"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/settings.json");
        let settings = load_settings_from_path(path).unwrap();
        assert_eq!(settings.server.port, BeaconSettings::default().server.port);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"store": {"address": "tcp://db:9999"}, "security": {"cors": {"origins": ["https://app.example"]}}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.store.address, "tcp://db:9999");
        assert_eq!(settings.security.cors.origins, vec!["https://app.example"]);
        assert!(settings.security.cors.allow_credentials);
        assert_eq!(settings.store.connect_timeout_ms, 10_000);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        assert_matches!(load_settings_from_path(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn load_invalid_values_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"realtime": {"path": "no-slash"}}"#).unwrap();

        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        );
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_values() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 0, 65535), Some(8080));
        assert_eq!(parse_u16_range("70000", 0, 65535), None);
        assert_eq!(parse_u64_range("50", 100, 1000), None);
        assert_eq!(parse_usize_range("abc", 1, 10), None);
    }

    #[test]
    fn parse_list_trims_and_skips_blanks() {
        assert_eq!(
            parse_list(" https://a.example, ,https://b.example "),
            vec!["https://a.example", "https://b.example"]
        );
        assert!(parse_list("").is_empty());
    }
}
