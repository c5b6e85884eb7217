//! Transport layer for the MQTT client
//!
//! This module provides the session abstraction the executor is written
//! against, and the rumqttc implementations for MQTT 3.1.1 and MQTT 5.

use crate::command::{ProtocolVersion, Qos};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

pub mod mqtt;
pub mod topic;

pub use mqtt::{ConnectionState, MqttError};

/// A PUBLISH received on one of the session's subscriptions
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
}

/// Callback invoked for every message delivered on a subscription
pub type MessageHandler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Sending half of a [`PendingOutcome`]
pub type OutcomeSender<T> = oneshot::Sender<Result<T, MqttError>>;

/// Result of an operation that the broker resolves later
#[derive(Debug)]
pub struct PendingOutcome<T> {
    rx: oneshot::Receiver<Result<T, MqttError>>,
}

impl<T> PendingOutcome<T> {
    pub fn channel() -> (OutcomeSender<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Outcome that is already known when the operation is issued
    pub fn ready(outcome: Result<T, MqttError>) -> Self {
        let (tx, pending) = Self::channel();
        let _ = tx.send(outcome);
        pending
    }

    /// Wait for the outcome. A sender dropped without answering counts as a failure.
    pub async fn resolve(self) -> Result<T, MqttError> {
        self.rx.await.unwrap_or(Err(MqttError::OutcomeDropped))
    }
}

/// Reason or return code carried by a CONNACK
pub trait ReasonCode {
    fn reason_code(&self) -> String;
}

impl ReasonCode for rumqttc::ConnAck {
    fn reason_code(&self) -> String {
        format!("{:?}", self.code)
    }
}

impl ReasonCode for rumqttc::v5::mqttbytes::v5::ConnAck {
    fn reason_code(&self) -> String {
        format!("{:?}", self.code)
    }
}

/// Acknowledgement of a publish
///
/// QoS 0 publishes have no acknowledgement packet and complete once written.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishAck<A, C> {
    Sent,
    Acknowledged(A),
    Completed(C),
}

/// Connect/subscribe/publish capability set shared by both protocol generations
///
/// Implementations differ only in their connect request and acknowledgement
/// types; everything reported to the user is derived through this trait.
#[async_trait::async_trait]
pub trait Session: Send + Sync {
    type ConnectRequest: fmt::Debug + Send + Sync;
    type ConnAck: ReasonCode + fmt::Debug + Send;
    type SubAck: fmt::Debug + Send + 'static;
    type PublishAck: fmt::Debug + Send + 'static;

    fn protocol(&self) -> ProtocolVersion;

    /// Connect and wait for the broker's answer
    async fn connect(&mut self, request: &Self::ConnectRequest) -> Result<Self::ConnAck, MqttError>;

    /// Live connection state, independent of any acknowledgement
    fn is_connected(&self) -> bool;

    /// Register `handler` for `filter` and send SUBSCRIBE. Returns without waiting for SUBACK.
    fn subscribe(
        &self,
        filter: &str,
        qos: Qos,
        handler: MessageHandler,
    ) -> PendingOutcome<Self::SubAck>;

    /// Send PUBLISH. Returns without waiting for the broker.
    fn publish(
        &self,
        topic: &str,
        qos: Qos,
        retain: bool,
        payload: Bytes,
    ) -> PendingOutcome<Self::PublishAck>;

    async fn disconnect(&mut self) -> Result<(), MqttError>;
}
