//! Per-generation adapters over rumqttc
//!
//! rumqttc exposes MQTT 3.1.1 and MQTT 5 as two parallel APIs with the same
//! shape. [`Protocol`] names the points where they differ so one session type
//! can drive either.

use super::connection::{
    configure_v3_options, configure_v5_options, BrokerAddress, V3ConnectRequest, V5ConnectRequest,
};
use super::inflight::PublishStage;
use super::message_handler::{EventRoute, EventRouter};
use crate::command::{ProtocolVersion, Qos};
use crate::transport::{PublishAck, ReasonCode};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5 as v5_packets;
use std::fmt;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A request the broker refused. The packet id is not known.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Subscribe(String),
    Publish { stage: PublishStage, reason: String },
}

/// Why polling the event loop failed
#[derive(Debug, Clone, PartialEq)]
pub enum PollFailure {
    /// The broker refused one request. rumqttc dropped the connection and
    /// reconnects on the next poll.
    Rejected(Rejection),
    /// The connection is gone for good
    Lost(String),
}

/// One MQTT generation as implemented by rumqttc
#[async_trait]
pub trait Protocol: Send + Sync + 'static {
    const VERSION: ProtocolVersion;

    type ConnectRequest: fmt::Debug + Send + Sync;
    type Client: Send + Sync + 'static;
    type EventLoop: Send + 'static;
    type Event: Send;
    type Error: std::error::Error + Send + Sync + 'static;
    type ConnAck: ReasonCode + fmt::Debug + Send + 'static;
    type SubAck: fmt::Debug + Send + 'static;
    type PubAck: fmt::Debug + Send + 'static;
    type PubComp: fmt::Debug + Send + 'static;

    fn create(
        broker: &BrokerAddress,
        request: &Self::ConnectRequest,
        capacity: usize,
    ) -> (Self::Client, Self::EventLoop);

    async fn poll(event_loop: &mut Self::EventLoop) -> Result<Self::Event, Self::Error>;

    fn connack(event: &Self::Event) -> Option<Self::ConnAck>;

    fn route(
        event: &Self::Event,
    ) -> EventRoute<Self::SubAck, PublishAck<Self::PubAck, Self::PubComp>>;

    fn classify(error: &Self::Error) -> PollFailure;

    async fn subscribe(client: &Self::Client, filter: &str, qos: Qos) -> Result<(), BoxError>;

    async fn publish(
        client: &Self::Client,
        topic: &str,
        qos: Qos,
        retain: bool,
        payload: Bytes,
    ) -> Result<(), BoxError>;

    async fn disconnect(client: &Self::Client) -> Result<(), BoxError>;
}

/// MQTT 3.1.1
#[derive(Debug)]
pub enum V3 {}

/// MQTT 5
#[derive(Debug)]
pub enum V5 {}

#[async_trait]
impl Protocol for V3 {
    const VERSION: ProtocolVersion = ProtocolVersion::V3;

    type ConnectRequest = V3ConnectRequest;
    type Client = rumqttc::AsyncClient;
    type EventLoop = rumqttc::EventLoop;
    type Event = rumqttc::Event;
    type Error = rumqttc::ConnectionError;
    type ConnAck = rumqttc::ConnAck;
    type SubAck = rumqttc::SubAck;
    type PubAck = rumqttc::PubAck;
    type PubComp = rumqttc::PubComp;

    fn create(
        broker: &BrokerAddress,
        request: &V3ConnectRequest,
        capacity: usize,
    ) -> (rumqttc::AsyncClient, rumqttc::EventLoop) {
        rumqttc::AsyncClient::new(configure_v3_options(broker, request), capacity)
    }

    async fn poll(
        event_loop: &mut rumqttc::EventLoop,
    ) -> Result<rumqttc::Event, rumqttc::ConnectionError> {
        event_loop.poll().await
    }

    fn connack(event: &rumqttc::Event) -> Option<rumqttc::ConnAck> {
        match event {
            rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(connack)) => Some(connack.clone()),
            _ => None,
        }
    }

    fn route(
        event: &rumqttc::Event,
    ) -> EventRoute<rumqttc::SubAck, PublishAck<rumqttc::PubAck, rumqttc::PubComp>> {
        EventRouter::route_v3_event(event)
    }

    // 3.1.1 reports SUBACK failures as events and has no publish reason codes
    fn classify(error: &rumqttc::ConnectionError) -> PollFailure {
        PollFailure::Lost(error.to_string())
    }

    async fn subscribe(client: &rumqttc::AsyncClient, filter: &str, qos: Qos) -> Result<(), BoxError> {
        client.subscribe(filter, qos.into()).await?;
        Ok(())
    }

    async fn publish(
        client: &rumqttc::AsyncClient,
        topic: &str,
        qos: Qos,
        retain: bool,
        payload: Bytes,
    ) -> Result<(), BoxError> {
        client.publish_bytes(topic, qos.into(), retain, payload).await?;
        Ok(())
    }

    async fn disconnect(client: &rumqttc::AsyncClient) -> Result<(), BoxError> {
        client.disconnect().await?;
        Ok(())
    }
}

#[async_trait]
impl Protocol for V5 {
    const VERSION: ProtocolVersion = ProtocolVersion::V5;

    type ConnectRequest = V5ConnectRequest;
    type Client = rumqttc::v5::AsyncClient;
    type EventLoop = rumqttc::v5::EventLoop;
    type Event = rumqttc::v5::Event;
    type Error = rumqttc::v5::ConnectionError;
    type ConnAck = v5_packets::ConnAck;
    type SubAck = v5_packets::SubAck;
    type PubAck = v5_packets::PubAck;
    type PubComp = v5_packets::PubComp;

    fn create(
        broker: &BrokerAddress,
        request: &V5ConnectRequest,
        capacity: usize,
    ) -> (rumqttc::v5::AsyncClient, rumqttc::v5::EventLoop) {
        rumqttc::v5::AsyncClient::new(configure_v5_options(broker, request), capacity)
    }

    async fn poll(
        event_loop: &mut rumqttc::v5::EventLoop,
    ) -> Result<rumqttc::v5::Event, rumqttc::v5::ConnectionError> {
        event_loop.poll().await
    }

    fn connack(event: &rumqttc::v5::Event) -> Option<v5_packets::ConnAck> {
        match event {
            rumqttc::v5::Event::Incoming(v5_packets::Packet::ConnAck(connack)) => {
                Some(connack.clone())
            }
            _ => None,
        }
    }

    fn route(
        event: &rumqttc::v5::Event,
    ) -> EventRoute<v5_packets::SubAck, PublishAck<v5_packets::PubAck, v5_packets::PubComp>> {
        EventRouter::route_v5_event(event)
    }

    fn classify(error: &rumqttc::v5::ConnectionError) -> PollFailure {
        use rumqttc::v5::{ConnectionError, StateError};

        let publish = |stage, reason: String| PollFailure::Rejected(Rejection::Publish { stage, reason });
        match error {
            ConnectionError::MqttState(StateError::SubFail { reason }) => {
                PollFailure::Rejected(Rejection::Subscribe(format!("SubAck reason code: {reason:?}")))
            }
            ConnectionError::MqttState(StateError::PubAckFail { reason }) => {
                publish(PublishStage::Acknowledge, format!("PubAck reason code: {reason:?}"))
            }
            ConnectionError::MqttState(StateError::PubRecFail { reason }) => {
                publish(PublishStage::Receive, format!("PubRec reason code: {reason:?}"))
            }
            ConnectionError::MqttState(StateError::PubCompFail { reason }) => {
                publish(PublishStage::Complete, format!("PubComp reason code: {reason:?}"))
            }
            other => PollFailure::Lost(other.to_string()),
        }
    }

    async fn subscribe(
        client: &rumqttc::v5::AsyncClient,
        filter: &str,
        qos: Qos,
    ) -> Result<(), BoxError> {
        client.subscribe(filter, qos.into()).await?;
        Ok(())
    }

    async fn publish(
        client: &rumqttc::v5::AsyncClient,
        topic: &str,
        qos: Qos,
        retain: bool,
        payload: Bytes,
    ) -> Result<(), BoxError> {
        client.publish_bytes(topic, qos.into(), retain, payload).await?;
        Ok(())
    }

    async fn disconnect(client: &rumqttc::v5::AsyncClient) -> Result<(), BoxError> {
        client.disconnect().await?;
        Ok(())
    }
}
