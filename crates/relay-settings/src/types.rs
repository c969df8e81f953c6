//! Settings types.
//!
//! Every struct uses `#[serde(default)]` so a partial settings file only
//! overrides the keys it names.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Per-session relay settings.
    pub session: SessionSettings,
    /// Upstream realtime endpoint.
    pub upstream: UpstreamSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Listener network settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listening port.
    pub port: u16,
    /// Maximum concurrently relayed client connections.
    pub max_connections: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            max_connections: 256,
        }
    }
}

/// Relay session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// How long the upstream connect attempt may take, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Client events buffered while upstream is connecting.
    pub max_pending_messages: usize,
    /// Capacity of the channel between the client socket reader and the session.
    pub client_channel_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 15_000,
            max_pending_messages: 1024,
            client_channel_capacity: 256,
        }
    }
}

/// Upstream realtime endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    /// WebSocket URL of the realtime API.
    pub url: String,
    /// Model passed as the `model` query parameter.
    pub model: String,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: "wss://api.openai.com/v1/realtime".to_string(),
            model: "gpt-4o-realtime-preview-2024-10-01".to_string(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let settings = RelaySettings::default();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8081);
        assert_eq!(settings.server.max_connections, 256);
        assert_eq!(settings.session.connect_timeout_ms, 15_000);
        assert_eq!(settings.session.max_pending_messages, 1024);
        assert_eq!(settings.upstream.url, "wss://api.openai.com/v1/realtime");
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.json);
    }

    #[test]
    fn camel_case_keys() {
        let value = serde_json::to_value(RelaySettings::default()).unwrap();
        assert!(value["server"].get("maxConnections").is_some());
        assert!(value["session"].get("connectTimeoutMs").is_some());
        assert!(value["session"].get("maxPendingMessages").is_some());
    }

    #[test]
    fn partial_object_fills_defaults() {
        let settings: RelaySettings =
            serde_json::from_str(r#"{"server":{"port":9000}}"#).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.session.max_pending_messages, 1024);
    }
}
