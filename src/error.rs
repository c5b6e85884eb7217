//! Top-level error type for the command line client
//!
//! Transport failures stay [`MqttError`]s inside the executor, which reports
//! them; this type is what `main` sees when a command cannot even start.

use crate::config::ConfigError;
use crate::transport::MqttError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Client is not connected to the broker")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CliError::invalid_argument("2 topics but 3 QoS levels");
        assert_eq!(
            error.to_string(),
            "Invalid argument: 2 topics but 3 QoS levels"
        );
    }

    #[test]
    fn test_mqtt_error_conversion() {
        let error: CliError = MqttError::Rejected("NotAuthorized".into()).into();
        assert!(matches!(error, CliError::Mqtt(_)));
        assert_eq!(error.to_string(), "MQTT error: Broker rejected request: NotAuthorized");
    }
}
