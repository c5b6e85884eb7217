//! Command descriptors handed to the executor
//!
//! A descriptor is the immutable bag of options one CLI invocation carries
//! into a connect, subscribe or publish call. The executor only reads them.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::CliError;
use crate::transport::mqtt::{Credentials, V3ConnectRequest, V5ConnectRequest};

/// MQTT protocol generation used for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// MQTT 3.1.1
    V3,
    /// MQTT 5.0
    #[default]
    V5,
}

impl ProtocolVersion {
    /// Parse from the numeric form used on the command line and in config files
    pub fn from_number(version: u8) -> Option<Self> {
        match version {
            3 => Some(ProtocolVersion::V3),
            5 => Some(ProtocolVersion::V5),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V3 => write!(f, "MQTT_3_1_1"),
            ProtocolVersion::V5 => write!(f, "MQTT_5_0"),
        }
    }
}

/// Delivery guarantee for a subscription or publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Qos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    pub fn level(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

impl FromStr for Qos {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" => Ok(Qos::AtMostOnce),
            "1" => Ok(Qos::AtLeastOnce),
            "2" => Ok(Qos::ExactlyOnce),
            other => Err(format!("invalid QoS level '{other}', expected 0, 1 or 2")),
        }
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl From<Qos> for rumqttc::v5::mqttbytes::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::v5::mqttbytes::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::v5::mqttbytes::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::v5::mqttbytes::QoS::ExactlyOnce,
        }
    }
}

/// Options for establishing a session
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectCommand {
    pub host: String,
    pub port: u16,
    pub version: ProtocolVersion,
    pub identifier: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub clean_start: bool,
    pub debug: bool,
}

impl Default for ConnectCommand {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            version: ProtocolVersion::default(),
            identifier: generate_client_id(),
            user: None,
            password: None,
            keep_alive_secs: 60,
            clean_start: true,
            debug: false,
        }
    }
}

/// Verbose rendering used by debug-mode connect reporting. Never prints the password.
impl fmt::Display for ConnectCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConnectCommand{{host={}, port={}, version={}, identifier={}, user={}, password={}, keepAlive={}, cleanStart={}, debug={}}}",
            self.host,
            self.port,
            self.version,
            self.identifier,
            self.user.as_deref().unwrap_or("null"),
            if self.password.is_some() { "***" } else { "null" },
            self.keep_alive_secs,
            self.clean_start,
            self.debug
        )
    }
}

impl ConnectCommand {
    /// Credentials for CONNECT. A password without a user is not sent.
    pub fn credentials(&self) -> Option<Credentials> {
        self.user.as_ref().map(|username| Credentials {
            username: username.clone(),
            password: self.password.clone().unwrap_or_default(),
        })
    }

    pub fn v3_request(&self) -> V3ConnectRequest {
        V3ConnectRequest {
            client_id: self.identifier.clone(),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            clean_session: self.clean_start,
            credentials: self.credentials(),
        }
    }

    pub fn v5_request(&self) -> V5ConnectRequest {
        V5ConnectRequest {
            client_id: self.identifier.clone(),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            clean_start: self.clean_start,
            credentials: self.credentials(),
        }
    }
}

/// Options for a subscription
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscribeCommand {
    pub debug: bool,
    /// Echo each decoded payload to stdout
    pub print_to_stdout: bool,
    /// Render payloads as base64 text instead of UTF-8
    pub base64: bool,
    /// Append every received message to this file
    pub output_file: Option<PathBuf>,
}

/// Options for a publish
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishCommand {
    pub debug: bool,
    pub message: String,
    pub retain: bool,
}

impl PublishCommand {
    pub fn payload(&self) -> bytes::Bytes {
        bytes::Bytes::copy_from_slice(self.message.as_bytes())
    }
}

/// Generate a client identifier for sessions that did not name one
pub fn generate_client_id() -> String {
    format!("mqtt-cli-{}", uuid::Uuid::new_v4().simple())
}

/// Pair every topic with its QoS level.
///
/// A single level applies to all topics, otherwise one level per topic is required.
/// No level at all means QoS 0 everywhere.
pub fn pair_topics_with_qos(topics: &[String], qos: &[Qos]) -> Result<Vec<(String, Qos)>, CliError> {
    if topics.is_empty() {
        return Err(CliError::InvalidArgument(
            "at least one topic is required".to_string(),
        ));
    }
    if let Some(empty) = topics.iter().find(|t| t.is_empty()) {
        return Err(CliError::InvalidArgument(format!(
            "topic must not be empty: '{empty}'"
        )));
    }

    match qos.len() {
        0 => Ok(topics.iter().map(|t| (t.clone(), Qos::default())).collect()),
        1 => Ok(topics.iter().map(|t| (t.clone(), qos[0])).collect()),
        n if n == topics.len() => Ok(topics.iter().cloned().zip(qos.iter().copied()).collect()),
        n => Err(CliError::InvalidArgument(format!(
            "{n} QoS levels given for {} topics",
            topics.len()
        ))),
    }
}
