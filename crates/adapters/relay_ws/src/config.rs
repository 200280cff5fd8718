//! Relay transport configuration.

use std::time::Duration;

use serde::Deserialize;

use hubrelay_app::ports::ReconnectPolicy;
use hubrelay_app::services::connection::ConnectionConfig;

/// Configuration for the relay session (`[relay]` section).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RelayWsConfig {
    /// WebSocket endpoint of the relay.
    pub url: String,
    /// Default wait for a correlated acknowledgement, in seconds.
    pub request_timeout_secs: u64,
    /// Upper bound for one connection attempt, in seconds.
    pub connect_timeout_secs: u64,
    /// Delay before the first reconnection attempt, in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Cap for the doubling reconnection delay, in milliseconds.
    pub reconnect_delay_max_ms: u64,
    /// Jitter applied to every reconnection delay (`0.0..=1.0`).
    pub randomization_factor: f64,
}

impl Default for RelayWsConfig {
    fn default() -> Self {
        Self {
            url: "wss://relay.example.invalid/socket".to_string(),
            request_timeout_secs: 300,
            connect_timeout_secs: 10,
            reconnect_delay_ms: 100,
            reconnect_delay_max_ms: 10_000,
            randomization_factor: 0.25,
        }
    }
}

impl RelayWsConfig {
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_delay_max_ms),
            randomization_factor: self.randomization_factor,
        }
    }

    /// Session settings for the connection manager.
    #[must_use]
    pub fn connection_config(&self, sync_reset: Duration) -> ConnectionConfig {
        ConnectionConfig {
            url: self.url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            reconnect: self.reconnect_policy(),
            sync_reset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_have_sensible_defaults() {
        let config = RelayWsConfig::default();
        assert_eq!(config.url, "wss://relay.example.invalid/socket");
        assert_eq!(config.request_timeout_secs, 300);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.reconnect_delay_ms, 100);
        assert_eq!(config.reconnect_delay_max_ms, 10_000);
    }

    #[test]
    fn should_use_defaults_for_missing_fields() {
        let config: RelayWsConfig =
            toml::from_str(r#"url = "ws://127.0.0.1:9000/socket""#).unwrap();
        assert_eq!(config.url, "ws://127.0.0.1:9000/socket");
        assert_eq!(config.connect_timeout_secs, 10);
        assert!((config.randomization_factor - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn should_build_connection_config() {
        let config: RelayWsConfig = toml::from_str(
            "
            request_timeout_secs = 30
            reconnect_delay_ms = 250
            reconnect_delay_max_ms = 2000
            randomization_factor = 0.0
            ",
        )
        .unwrap();

        let connection = config.connection_config(Duration::from_secs(6));

        assert_eq!(connection.request_timeout, Duration::from_secs(30));
        assert_eq!(connection.connect_timeout, Duration::from_secs(10));
        assert_eq!(connection.reconnect.initial_delay, Duration::from_millis(250));
        assert_eq!(connection.reconnect.max_delay, Duration::from_secs(2));
        assert_eq!(connection.sync_reset, Duration::from_secs(6));
    }
}
