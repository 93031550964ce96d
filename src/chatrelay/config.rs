use std::fs;
use std::path::Path;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use crate::error::{RelayError, ErrorCode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Name of this node, sent as the origin of its publishes
    pub id: String,
    pub broker: BrokerConfig,
    /// Present on the node that also hosts the relay hub
    #[serde(default)]
    pub hub: Option<HubConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// `host:port` of the relay hub
    pub endpoint: String,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    pub addr: String,
}

fn default_reconnect_interval_ms() -> u64 {
    1000
}

impl BrokerConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, RelayError> {
        let content = fs::read_to_string(path)
            .map_err(|e| RelayError::new(ErrorCode::ConfigInvalid, format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, RelayError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RelayError::new(ErrorCode::ConfigInvalid, format!("Failed to parse TOML: {}", e)))?;

        if config.broker.endpoint.trim().is_empty() {
            return Err(RelayError::new(ErrorCode::ConfigInvalid, "broker.endpoint must not be empty"));
        }
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), RelayError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RelayError::new(ErrorCode::ConfigInvalid, format!("Failed to serialize to TOML: {}", e)))?;

        fs::write(path, content)
            .map_err(|e| RelayError::new(ErrorCode::ConfigInvalid, format!("Failed to write config file: {}", e)))
    }
}
