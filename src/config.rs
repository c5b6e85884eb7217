//! Optional defaults file for the command line client
//!
//! Values here only fill in what the command line leaves unset. Credentials
//! are never stored in the file; it names the environment variables holding them.

use crate::command::ProtocolVersion;
use crate::transport::mqtt::BrokerAddress;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File looked up in the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "mqtt-cli.toml";

/// Client configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CliConfig {
    #[serde(default)]
    pub broker: BrokerSection,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL, `mqtt://host:port` or `mqtts://host:port`
    #[serde(default = "default_url")]
    pub url: String,
    /// Protocol generation, 3 or 5
    #[serde(default = "default_mqtt_version")]
    pub mqtt_version: u8,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// How long to wait for CONNACK
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_mqtt_version() -> u8 {
    5
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            url: default_url(),
            mqtt_version: default_mqtt_version(),
            username_env: None,
            password_env: None,
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CliConfig {
    /// Load and validate a configuration file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: CliConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else `./mqtt-cli.toml` if present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.is_file() {
                    Self::load_from_file(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        BrokerAddress::parse(&self.broker.url)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        if ProtocolVersion::from_number(self.broker.mqtt_version).is_none() {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt_version must be 3 or 5, got {}",
                self.broker.mqtt_version
            )));
        }
        if self.broker.keep_alive_secs > u64::from(u16::MAX) {
            return Err(ConfigError::InvalidConfig(format!(
                "keep_alive_secs must not exceed {}, got {}",
                u16::MAX,
                self.broker.keep_alive_secs
            )));
        }
        if self.broker.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "connect_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn broker_address(&self) -> Result<BrokerAddress, ConfigError> {
        BrokerAddress::parse(&self.broker.url).map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::from_number(self.broker.mqtt_version).unwrap_or_default()
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn username(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn password(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.password_env.as_ref())
    }
}
