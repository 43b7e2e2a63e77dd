//! Client configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration for a local gateway. Values are layered: defaults,
//! then an optional file, then `BROKER_*` environment variables.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use trading::{ContractDefaults, TickType};

fn default_port() -> u16 {
    7496
}

fn default_max_connect_attempts() -> u32 {
    50
}

fn default_connect_retry_delay_ms() -> u64 {
    1000
}

fn default_pump_interval_ms() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Gateway host. Empty means the local machine.
    #[serde(default)]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    client_id: i32,
    /// Bootstrap budget. Once spent the client stays not-ready for good.
    #[serde(default = "default_max_connect_attempts")]
    max_connect_attempts: u32,
    #[serde(default = "default_connect_retry_delay_ms")]
    connect_retry_delay_ms: u64,
    /// Yield between two message pump iterations.
    #[serde(default = "default_pump_interval_ms")]
    pump_interval_ms: u64,
    #[serde(default)]
    tick_type: TickType,
    #[serde(default)]
    contract: ContractDefaults,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            client_id: 0,
            max_connect_attempts: default_max_connect_attempts(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
            pump_interval_ms: default_pump_interval_ms(),
            tick_type: TickType::default(),
            contract: ContractDefaults::default(),
        }
    }
}

impl ClientConfig {
    /// Loads the configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Optional TOML/JSON/YAML file, format inferred from the extension.
    ///
    /// # Returns
    ///
    /// * `Ok(ClientConfig)` with file and `BROKER_*` overrides applied.
    /// * `Err(ClientError::Config)` if the file is unreadable or a value does not parse.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("BROKER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16, client_id: i32) -> Self {
        self.host = host.into();
        self.port = port;
        self.client_id = client_id;
        self
    }

    pub fn with_connect_policy(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_connect_attempts = max_attempts;
        self.connect_retry_delay_ms = retry_delay.as_millis() as u64;
        self
    }

    pub fn with_pump_interval(mut self, interval: Duration) -> Self {
        self.pump_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_tick_type(mut self, tick_type: TickType) -> Self {
        self.tick_type = tick_type;
        self
    }

    pub fn with_contract_defaults(mut self, contract: ContractDefaults) -> Self {
        self.contract = contract;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn client_id(&self) -> i32 {
        self.client_id
    }

    pub fn max_connect_attempts(&self) -> u32 {
        self.max_connect_attempts
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms)
    }

    pub fn tick_type(&self) -> TickType {
        self.tick_type
    }

    pub fn contract_defaults(&self) -> &ContractDefaults {
        &self.contract
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_local_gateway() {
        let config = ClientConfig::default();
        assert_eq!(config.host(), "");
        assert_eq!(config.port(), 7496);
        assert_eq!(config.client_id(), 0);
        assert_eq!(config.max_connect_attempts(), 50);
        assert_eq!(config.connect_retry_delay(), Duration::from_secs(1));
        assert_eq!(config.pump_interval(), Duration::from_millis(10));
        assert_eq!(config.tick_type(), TickType::AllLast);
        assert_eq!(config.contract_defaults().primary_exchange, "ISLAND");
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "port = 7497\nclient_id = 3\ntick_type = \"BidAsk\"\n\n[contract]\ncurrency = \"CAD\""
        )
        .unwrap();

        let config = ClientConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.port(), 7497);
        assert_eq!(config.client_id(), 3);
        assert_eq!(config.tick_type(), TickType::BidAsk);
        assert_eq!(config.contract_defaults().currency, "CAD");
        // Untouched fields keep their defaults.
        assert_eq!(config.contract_defaults().exchange, "SMART");
        assert_eq!(config.max_connect_attempts(), 50);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = ClientConfig::load(Some(Path::new("/nonexistent/broker.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_overrides() {
        let config = ClientConfig::default()
            .with_endpoint("10.0.0.2", 4002, 7)
            .with_connect_policy(3, Duration::from_millis(5))
            .with_pump_interval(Duration::from_millis(1));
        assert_eq!(config.host(), "10.0.0.2");
        assert_eq!(config.port(), 4002);
        assert_eq!(config.client_id(), 7);
        assert_eq!(config.max_connect_attempts(), 3);
        assert_eq!(config.connect_retry_delay(), Duration::from_millis(5));
        assert_eq!(config.pump_interval(), Duration::from_millis(1));
    }
}
