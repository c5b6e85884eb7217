//! Pure connection state management for the MQTT sessions
//!
//! This module contains the connection state type, the transport error type and
//! pure functions that turn connect requests into rumqttc options.

use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection state for an MQTT session
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Created, connect not yet attempted
    Idle,
    /// Waiting for CONNACK
    Connecting,
    /// CONNACK received and the event loop is running
    Connected,
    /// Disconnected with reason
    Disconnected(String),
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("ConnAck timeout - no connection confirmation received within {timeout_secs}s")]
    ConnAckTimeout { timeout_secs: u64 },
    #[error("Request could not be queued")]
    RequestFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Broker rejected request: {0}")]
    Rejected(String),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Session is already connected")]
    AlreadyConnected,
    #[error("Operation outcome was dropped before it resolved")]
    OutcomeDropped,
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
}

/// Where the broker lives and how to reach it
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: false,
        }
    }

    /// Parse `mqtt://host[:port]` or `mqtts://host[:port]`
    pub fn parse(broker_url: &str) -> Result<Self, MqttError> {
        let url =
            Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

        let tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            _ => return Err(MqttError::InvalidBrokerUrl(broker_url.to_string())),
        };
        let host = url
            .host_str()
            .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;
        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }
}

/// Username/password pair sent in CONNECT
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// MQTT 3.1.1 CONNECT parameters
#[derive(Debug, Clone, PartialEq)]
pub struct V3ConnectRequest {
    pub client_id: String,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub credentials: Option<Credentials>,
}

/// MQTT 5 CONNECT parameters
#[derive(Debug, Clone, PartialEq)]
pub struct V5ConnectRequest {
    pub client_id: String,
    pub keep_alive: Duration,
    pub clean_start: bool,
    pub credentials: Option<Credentials>,
}

/// Build rumqttc 3.1.1 options from a connect request (pure function)
pub fn configure_v3_options(
    broker: &BrokerAddress,
    request: &V3ConnectRequest,
) -> rumqttc::MqttOptions {
    let mut options =
        rumqttc::MqttOptions::new(request.client_id.clone(), broker.host.clone(), broker.port);
    options.set_keep_alive(request.keep_alive);
    options.set_clean_session(request.clean_session);

    if let Some(credentials) = &request.credentials {
        options.set_credentials(&credentials.username, &credentials.password);
    }
    if broker.tls {
        options.set_transport(RumqttcTransport::tls_with_default_config());
    }
    options
}

/// Build rumqttc MQTT 5 options from a connect request (pure function)
pub fn configure_v5_options(
    broker: &BrokerAddress,
    request: &V5ConnectRequest,
) -> rumqttc::v5::MqttOptions {
    let mut options =
        rumqttc::v5::MqttOptions::new(request.client_id.clone(), broker.host.clone(), broker.port);
    options.set_keep_alive(request.keep_alive);
    options.set_clean_start(request.clean_start);

    if let Some(credentials) = &request.credentials {
        options.set_credentials(&credentials.username, &credentials.password);
    }
    if broker.tls {
        options.set_transport(RumqttcTransport::tls_with_default_config());
    }
    options
}
