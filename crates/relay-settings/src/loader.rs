//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Numeric values outside their accepted range fall back to the default
//! whether they come from the file or the environment.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use relay_core::ApiKey;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::RelaySettings;

/// Environment variable holding the upstream credential.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const PORT_RANGE: RangeInclusive<u64> = 1..=65_535;
const MAX_CONNECTIONS_RANGE: RangeInclusive<u64> = 1..=100_000;
const CONNECT_TIMEOUT_MS_RANGE: RangeInclusive<u64> = 100..=600_000;
const MAX_PENDING_RANGE: RangeInclusive<u64> = 1..=1_000_000;
const CHANNEL_CAPACITY_RANGE: RangeInclusive<u64> = 1..=65_536;

/// Resolve the path to the settings file (`~/.realtime-relay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".realtime-relay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    reset_out_of_range(&mut settings);
    Ok(settings)
}

/// Replace out-of-range numeric file values with their defaults.
fn reset_out_of_range(settings: &mut RelaySettings) {
    let defaults = RelaySettings::default();
    let server = &mut settings.server;
    server.port = in_range("server.port", server.port, &PORT_RANGE, defaults.server.port);
    server.max_connections = in_range(
        "server.maxConnections",
        server.max_connections,
        &MAX_CONNECTIONS_RANGE,
        defaults.server.max_connections,
    );

    let session = &mut settings.session;
    session.connect_timeout_ms = in_range(
        "session.connectTimeoutMs",
        session.connect_timeout_ms,
        &CONNECT_TIMEOUT_MS_RANGE,
        defaults.session.connect_timeout_ms,
    );
    session.max_pending_messages = in_range(
        "session.maxPendingMessages",
        session.max_pending_messages,
        &MAX_PENDING_RANGE,
        defaults.session.max_pending_messages,
    );
    session.client_channel_capacity = in_range(
        "session.clientChannelCapacity",
        session.client_channel_capacity,
        &CHANNEL_CAPACITY_RANGE,
        defaults.session.client_channel_capacity,
    );
}

fn in_range<T>(key: &str, value: T, range: &RangeInclusive<u64>, default: T) -> T
where
    T: Copy + Display + TryInto<u64>,
{
    match value.try_into() {
        Ok(n) if range.contains(&n) => value,
        _ => {
            warn!(key, value = %value, default = %default, "settings value out of range, using default");
            default
        }
    }
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

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_overrides_from<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.u64_in("PORT", &PORT_RANGE) {
        settings.server.port = u16::try_from(v).unwrap_or(settings.server.port);
    }
    if let Some(v) = env.string("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64_in("RELAY_MAX_CONNECTIONS", &MAX_CONNECTIONS_RANGE) {
        settings.server.max_connections = usize::try_from(v).unwrap_or(settings.server.max_connections);
    }

    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = env.u64_in("RELAY_CONNECT_TIMEOUT_MS", &CONNECT_TIMEOUT_MS_RANGE) {
        settings.session.connect_timeout_ms = v;
    }
    if let Some(v) = env.u64_in("RELAY_MAX_PENDING", &MAX_PENDING_RANGE) {
        settings.session.max_pending_messages =
            usize::try_from(v).unwrap_or(settings.session.max_pending_messages);
    }

    // ── Upstream ────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_UPSTREAM_URL") {
        settings.upstream.url = v;
    }
    if let Some(v) = env.string("RELAY_MODEL") {
        settings.upstream.model = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.bool("RELAY_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Read the upstream credential from the process environment.
pub fn load_api_key() -> Result<ApiKey> {
    api_key_from(|name| std::env::var(name).ok())
}

/// Read the upstream credential through `lookup`.
pub fn api_key_from<F>(lookup: F) -> Result<ApiKey>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(API_KEY_ENV)
        .map(ApiKey::new)
        .filter(|key| !key.is_blank())
        .ok_or(SettingsError::MissingCredential(API_KEY_ENV))
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

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_in(&self, name: &str, range: &RangeInclusive<u64>) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, *range.start(), *range.end());
        if result.is_none() {
            warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8081, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
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
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4, 5]));
    }

    // ── file loading ────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = read_settings_file(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.port, 8081);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9090}, "session": {"maxPendingMessages": 8}}"#,
        )
        .unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.session.max_pending_messages, 8);
        assert_eq!(settings.session.connect_timeout_ms, 15_000);
    }

    #[test]
    fn out_of_range_file_values_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "server": {"port": 0, "maxConnections": 0},
                "session": {"connectTimeoutMs": 0, "maxPendingMessages": 0, "clientChannelCapacity": 0}
            }"#,
        )
        .unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.server.port, 8081);
        assert_eq!(settings.server.max_connections, 256);
        assert_eq!(settings.session.connect_timeout_ms, 15_000);
        assert_eq!(settings.session.max_pending_messages, 1024);
        assert_eq!(settings.session.client_channel_capacity, 256);
    }

    #[test]
    fn file_values_at_range_edges_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"maxConnections": 1}, "session": {"connectTimeoutMs": 100}}"#,
        )
        .unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.server.max_connections, 1);
        assert_eq!(settings.session.connect_timeout_ms, 100);
    }

    #[test]
    fn invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = read_settings_file(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut settings = RelaySettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("PORT", "9000"),
                ("RELAY_HOST", "127.0.0.1"),
                ("RELAY_CONNECT_TIMEOUT_MS", "2500"),
                ("RELAY_MAX_PENDING", "16"),
                ("RELAY_MODEL", "gpt-test"),
                ("RELAY_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.session.connect_timeout_ms, 2500);
        assert_eq!(settings.session.max_pending_messages, 16);
        assert_eq!(settings.upstream.model, "gpt-test");
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut settings = RelaySettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[("PORT", "not-a-port"), ("RELAY_MAX_PENDING", "0"), ("RELAY_LOG_JSON", "maybe")]),
        );
        assert_eq!(settings.server.port, 8081);
        assert_eq!(settings.session.max_pending_messages, 1024);
        assert!(!settings.logging.json);
    }

    #[test]
    fn port_out_of_range_ignored() {
        let mut settings = RelaySettings::default();
        apply_overrides_from(&mut settings, env(&[("PORT", "70000")]));
        assert_eq!(settings.server.port, 8081);
    }

    #[test]
    fn empty_string_env_ignored() {
        let mut settings = RelaySettings::default();
        apply_overrides_from(&mut settings, env(&[("RELAY_HOST", "")]));
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    // ── credential ──────────────────────────────────────────────────

    #[test]
    fn api_key_present() {
        let key = api_key_from(env(&[(API_KEY_ENV, "sk-abc123")])).unwrap();
        assert_eq!(key.log_prefix(), "sk-...");
    }

    #[test]
    fn api_key_missing() {
        let err = api_key_from(env(&[])).unwrap_err();
        assert!(matches!(err, SettingsError::MissingCredential(API_KEY_ENV)));
    }

    #[test]
    fn api_key_blank_is_missing() {
        let err = api_key_from(env(&[(API_KEY_ENV, "  ")])).unwrap_err();
        assert!(matches!(err, SettingsError::MissingCredential(_)));
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("5", 1, 10), Some(5));
        assert_eq!(parse_u64_range("0", 1, 10), None);
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_u64_range("x", 1, 10), None);
    }
}
