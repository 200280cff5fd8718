//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `hubrelay.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::time::Duration;

use serde::Deserialize;

use hubrelay_adapter_relay_ws::RelayWsConfig;
use hubrelay_app::bridge::BridgeConfig;
use hubrelay_app::services::aggregator::AggregatorConfig;
use hubrelay_domain::session::HubInfo;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relay session settings.
    pub relay: RelayWsConfig,
    /// Database settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Event pipeline timing.
    pub bridge: BridgeSection,
    /// Identity reported by the simulated hub.
    pub hub: HubSection,
}

/// `SQLite` database configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL or file path.
    pub url: String,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    /// Quiet period before a composite capability is emitted.
    pub debounce_ms: u64,
    /// Bound on the album-art lookup.
    pub enrichment_timeout_ms: u64,
    /// How long a completed location sync stays reported.
    pub sync_reset_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HubSection {
    pub app_version: String,
    pub system_version: String,
    pub platform: String,
    pub sdk: u32,
}

impl Config {
    /// Load configuration from `hubrelay.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting values are unusable.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("hubrelay.toml")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HUBRELAY_RELAY_URL") {
            self.relay.url = val;
        }
        if let Ok(val) = std::env::var("HUBRELAY_REQUEST_TIMEOUT_SECS")
            && let Ok(secs) = val.parse()
        {
            self.relay.request_timeout_secs = secs;
        }
        if let Ok(val) = std::env::var("HUBRELAY_DATABASE_URL") {
            self.database.url = val;
        }
        if let Ok(val) = std::env::var("HUBRELAY_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.url.trim().is_empty() {
            return Err(ConfigError::Validation("relay.url must not be empty".to_string()));
        }
        if self.relay.request_timeout_secs == 0 || self.relay.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "relay timeouts must be non-zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.relay.randomization_factor) {
            return Err(ConfigError::Validation(
                "relay.randomization_factor must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.bridge.enrichment_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "bridge.enrichment_timeout_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Return the database URL in `sqlx`-compatible format.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database.url
    }

    #[must_use]
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            connection: self
                .relay
                .connection_config(Duration::from_secs(self.bridge.sync_reset_secs)),
            aggregator: AggregatorConfig {
                debounce: Duration::from_millis(self.bridge.debounce_ms),
                enrichment_timeout: Duration::from_millis(self.bridge.enrichment_timeout_ms),
            },
        }
    }

    #[must_use]
    pub fn hub_info(&self) -> HubInfo {
        HubInfo {
            app_version: self.hub.app_version.clone(),
            system_version: self.hub.system_version.clone(),
            platform: self.hub.platform.clone(),
            sdk: self.hub.sdk,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:hubrelay.db?mode=rwc".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "hubrelayd=info,hubrelay=info".to_string(),
        }
    }
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            enrichment_timeout_ms: 3000,
            sync_reset_secs: 6,
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            system_version: "virtual".to_string(),
            platform: "local".to_string(),
            sdk: 3,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.relay.url, "wss://relay.example.invalid/socket");
        assert_eq!(config.database.url, "sqlite:hubrelay.db?mode=rwc");
        assert_eq!(config.logging.filter, "hubrelayd=info,hubrelay=info");
        assert_eq!(config.bridge.debounce_ms, 500);
        assert_eq!(config.hub.sdk, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = "
            [relay]
            url = 'ws://127.0.0.1:9000/socket'
            request_timeout_secs = 60
            randomization_factor = 0.5

            [database]
            url = 'sqlite:test.db'

            [logging]
            filter = 'debug'

            [bridge]
            debounce_ms = 250
            sync_reset_secs = 2

            [hub]
            platform = 'test-bench'
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.relay.url, "ws://127.0.0.1:9000/socket");
        assert_eq!(config.relay.request_timeout_secs, 60);
        assert_eq!(config.relay.connect_timeout_secs, 10);
        assert_eq!(config.database_url(), "sqlite:test.db");
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.bridge.debounce_ms, 250);
        assert_eq!(config.bridge.enrichment_timeout_ms, 3000);
        assert_eq!(config.hub_info().platform, "test-bench");
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.relay.request_timeout_secs, 300);
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }

    #[test]
    fn should_reject_empty_relay_url() {
        let mut config = Config::default();
        config.relay.url = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn should_reject_zero_timeouts() {
        let mut config = Config::default();
        config.relay.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_out_of_range_randomization() {
        let mut config = Config::default();
        config.relay.randomization_factor = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_map_sections_into_bridge_config() {
        let mut config = Config::default();
        config.bridge.debounce_ms = 50;
        config.bridge.sync_reset_secs = 1;

        let bridge = config.bridge_config();

        assert_eq!(bridge.aggregator.debounce, Duration::from_millis(50));
        assert_eq!(bridge.connection.sync_reset, Duration::from_secs(1));
        assert_eq!(bridge.connection.url, config.relay.url);
    }
}
