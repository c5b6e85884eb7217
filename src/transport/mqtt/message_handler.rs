//! Pure routing of rumqttc events for both protocol generations
//!
//! Each event loop event is reduced to an [`EventRoute`] here. Only the session
//! core acts on routes, so the version-specific packet shapes stop at this module.
//!
//! rumqttc's MQTT 5 event loop fails the poll for SUBACK, PUBACK, PUBREC and
//! PUBCOMP carrying a failure reason, so only successful acknowledgements reach
//! [`EventRouter::route_v5_event`]. The failures are classified in
//! [`super::protocol`].

use crate::command::Qos;
use crate::transport::{InboundMessage, PublishAck};
use rumqttc::v5::mqttbytes::v5 as v5_packets;
use rumqttc::Outgoing;

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute<S, P> {
    /// CONNACK received
    ConnectionAcknowledged { session_present: bool },
    /// PUBLISH received on a subscribed topic
    MessageReceived(InboundMessage),
    /// SUBSCRIBE written with this packet id
    SubscribeSent(u16),
    /// SUBACK received
    SubscribeResolved { pkid: u16, outcome: Result<S, String> },
    /// PUBLISH written with this packet id (0 for QoS 0)
    PublishSent(u16),
    /// PUBREC received for a QoS 2 publish
    PublishReceived(u16),
    /// Final acknowledgement of an outgoing publish
    PublishResolved { pkid: u16, ack: P },
    /// Broker sent DISCONNECT
    Disconnected(String),
    /// Client sent DISCONNECT
    DisconnectSent,
    /// Infrastructure event (PingResp, PubRel, etc.)
    InfrastructureEvent(String),
    /// Outgoing event that needs no handling
    OutgoingEvent,
}

pub type V3Route = EventRoute<rumqttc::SubAck, PublishAck<rumqttc::PubAck, rumqttc::PubComp>>;
pub type V5Route = EventRoute<
    v5_packets::SubAck,
    PublishAck<v5_packets::PubAck, v5_packets::PubComp>,
>;

/// Pure routing decisions based on MQTT events
pub struct EventRouter;

impl EventRouter {
    /// Route an MQTT 3.1.1 event
    pub fn route_v3_event(event: &rumqttc::Event) -> V3Route {
        use rumqttc::{Packet, SubscribeReasonCode};

        match event {
            rumqttc::Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    session_present: connack.session_present,
                },
                Packet::Publish(publish) => EventRoute::MessageReceived(InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    qos: publish.qos.into(),
                    retain: publish.retain,
                }),
                Packet::SubAck(suback) => {
                    let rejected = suback
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure));
                    EventRoute::SubscribeResolved {
                        pkid: suback.pkid,
                        outcome: if rejected {
                            Err(format!("SubAck return codes: {:?}", suback.return_codes))
                        } else {
                            Ok(suback.clone())
                        },
                    }
                }
                Packet::PubAck(puback) => EventRoute::PublishResolved {
                    pkid: puback.pkid,
                    ack: PublishAck::Acknowledged(puback.clone()),
                },
                Packet::PubRec(pubrec) => EventRoute::PublishReceived(pubrec.pkid),
                Packet::PubComp(pubcomp) => EventRoute::PublishResolved {
                    pkid: pubcomp.pkid,
                    ack: PublishAck::Completed(pubcomp.clone()),
                },
                Packet::Disconnect => EventRoute::Disconnected("Broker disconnected".to_string()),
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            rumqttc::Event::Outgoing(outgoing) => Self::route_outgoing(outgoing),
        }
    }

    /// Route an MQTT 5 event
    pub fn route_v5_event(event: &rumqttc::v5::Event) -> V5Route {
        use v5_packets::Packet;

        match event {
            rumqttc::v5::Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    session_present: connack.session_present,
                },
                Packet::Publish(publish) => EventRoute::MessageReceived(InboundMessage {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.clone(),
                    qos: publish.qos.into(),
                    retain: publish.retain,
                }),
                Packet::SubAck(suback) => EventRoute::SubscribeResolved {
                    pkid: suback.pkid,
                    outcome: Ok(suback.clone()),
                },
                Packet::PubAck(puback) => EventRoute::PublishResolved {
                    pkid: puback.pkid,
                    ack: PublishAck::Acknowledged(puback.clone()),
                },
                Packet::PubRec(pubrec) => EventRoute::PublishReceived(pubrec.pkid),
                Packet::PubComp(pubcomp) => EventRoute::PublishResolved {
                    pkid: pubcomp.pkid,
                    ack: PublishAck::Completed(pubcomp.clone()),
                },
                Packet::Disconnect(disconnect) => EventRoute::Disconnected(format!(
                    "Broker disconnected: {:?}",
                    disconnect.reason_code
                )),
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            rumqttc::v5::Event::Outgoing(outgoing) => Self::route_outgoing(outgoing),
        }
    }

    fn route_outgoing<S, P>(outgoing: &Outgoing) -> EventRoute<S, P> {
        match outgoing {
            Outgoing::Subscribe(pkid) => EventRoute::SubscribeSent(*pkid),
            Outgoing::Publish(pkid) => EventRoute::PublishSent(*pkid),
            Outgoing::Disconnect => EventRoute::DisconnectSent,
            _ => EventRoute::OutgoingEvent,
        }
    }
}

impl From<rumqttc::QoS> for Qos {
    fn from(qos: rumqttc::QoS) -> Self {
        match qos {
            rumqttc::QoS::AtMostOnce => Qos::AtMostOnce,
            rumqttc::QoS::AtLeastOnce => Qos::AtLeastOnce,
            rumqttc::QoS::ExactlyOnce => Qos::ExactlyOnce,
        }
    }
}

impl From<rumqttc::v5::mqttbytes::QoS> for Qos {
    fn from(qos: rumqttc::v5::mqttbytes::QoS) -> Self {
        match qos {
            rumqttc::v5::mqttbytes::QoS::AtMostOnce => Qos::AtMostOnce,
            rumqttc::v5::mqttbytes::QoS::AtLeastOnce => Qos::AtLeastOnce,
            rumqttc::v5::mqttbytes::QoS::ExactlyOnce => Qos::ExactlyOnce,
        }
    }
}
