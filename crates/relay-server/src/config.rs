//! Server configuration.

use std::time::Duration;

use relay_settings::RelaySettings;
use serde::{Deserialize, Serialize};

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrently relayed clients. Further upgrades get 503.
    pub max_connections: usize,
    /// Upstream connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Client events buffered while the upstream connects.
    pub max_pending_messages: usize,
    /// Capacity of the client reader channel.
    pub client_channel_capacity: usize,
}

impl RelayConfig {
    /// Upstream connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 256,
            connect_timeout_ms: 15_000,
            max_pending_messages: 1024,
            client_channel_capacity: 256,
        }
    }
}

impl From<&RelaySettings> for RelayConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            connect_timeout_ms: settings.session.connect_timeout_ms,
            max_pending_messages: settings.session.max_pending_messages,
            client_channel_capacity: settings.session.client_channel_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_auto_port() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn default_limits() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.max_pending_messages, 1024);
        assert_eq!(cfg.client_channel_capacity, 256);
    }

    #[test]
    fn connect_timeout_duration() {
        let cfg = RelayConfig {
            connect_timeout_ms: 1500,
            ..RelayConfig::default()
        };
        assert_eq!(cfg.connect_timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn from_settings_copies_every_field() {
        let mut settings = RelaySettings::default();
        settings.server.port = 9001;
        settings.server.max_connections = 3;
        settings.session.connect_timeout_ms = 700;
        settings.session.max_pending_messages = 9;

        let cfg = RelayConfig::from(&settings);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 9001);
        assert_eq!(cfg.max_connections, 3);
        assert_eq!(cfg.connect_timeout_ms, 700);
        assert_eq!(cfg.max_pending_messages, 9);
        assert_eq!(cfg.client_channel_capacity, 256);
    }

    #[test]
    fn deserialize_from_json_string() {
        let json = r#"{"host":"10.0.0.1","port":3000,"max_connections":5,"connect_timeout_ms":100,"max_pending_messages":4,"client_channel_capacity":8}"#;
        let cfg: RelayConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.host, "10.0.0.1");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.max_pending_messages, 4);
    }
}
