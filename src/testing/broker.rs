//! In-process MQTT broker for transport tests
//!
//! Speaks just enough MQTT 3.1.1 and MQTT 5 to drive a real rumqttc event loop:
//! CONNACK, SUBACK, publish acknowledgements and PINGRESP. Each accepted
//! connection is served by its own task, so clients may reconnect.

use crate::command::{ProtocolVersion, Qos};
use crate::transport::mqtt::BrokerAddress;
use crate::transport::topic;
use bytes::{Bytes, BytesMut};
use rumqttc::v5::mqttbytes::v5 as v5_packets;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::debug;

const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// What the broker refuses and what it sends to new subscribers
#[derive(Debug, Clone, Default)]
pub struct BrokerScript {
    /// Filters answered with a failure SUBACK
    pub rejected_filters: Vec<String>,
    /// Topics whose QoS 1 and 2 publishes are refused (MQTT 5 only)
    pub rejected_topics: Vec<String>,
    /// Sent at QoS 0 right after a successful SUBACK whose filter matches
    pub retained: Vec<(String, Bytes)>,
}

impl BrokerScript {
    pub fn reject_filter(mut self, filter: &str) -> Self {
        self.rejected_filters.push(filter.to_string());
        self
    }

    pub fn reject_topic(mut self, topic_name: &str) -> Self {
        self.rejected_topics.push(topic_name.to_string());
        self
    }

    pub fn retain(mut self, topic_name: &str, payload: impl Into<Bytes>) -> Self {
        self.retained.push((topic_name.to_string(), payload.into()));
        self
    }
}

#[derive(Debug, Default)]
struct Journal {
    connections: usize,
    subscriptions: Vec<String>,
    publishes: Vec<(String, Bytes)>,
}

enum Request {
    Connect,
    Subscribe { pkid: u16, filters: Vec<(String, Qos)> },
    Publish { pkid: u16, qos: Qos, topic: String, payload: Bytes },
    PubRel(u16),
    PingReq,
    Disconnect,
    Other,
}

enum Reply {
    ConnAck,
    SubAck { pkid: u16, granted: Vec<Option<Qos>> },
    PubAck { pkid: u16, refused: bool },
    PubRec { pkid: u16, refused: bool },
    PubComp(u16),
    Publish { topic: String, payload: Bytes },
    PingResp,
}

/// A broker listening on an ephemeral localhost port
pub struct FakeBroker {
    port: u16,
    journal: Arc<Mutex<Journal>>,
    accept_handle: JoinHandle<()>,
}

fn lock(journal: &Mutex<Journal>) -> MutexGuard<'_, Journal> {
    journal.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeBroker {
    pub async fn start(version: ProtocolVersion, script: BrokerScript) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let journal = Arc::new(Mutex::new(Journal::default()));
        let script = Arc::new(script);

        let accept_journal = journal.clone();
        let accept_handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let script = script.clone();
                let journal = accept_journal.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve(stream, version, &script, &journal).await {
                        debug!("Fake broker connection ended: {}", e);
                    }
                });
            }
        });

        Ok(Self {
            port,
            journal,
            accept_handle,
        })
    }

    pub fn address(&self) -> BrokerAddress {
        BrokerAddress::new("127.0.0.1", self.port)
    }

    /// Number of CONNECT packets received so far
    pub fn connections(&self) -> usize {
        lock(&self.journal).connections
    }

    /// Every filter received in a SUBSCRIBE, in arrival order
    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.journal).subscriptions.clone()
    }

    pub fn publishes(&self) -> Vec<(String, Bytes)> {
        lock(&self.journal).publishes.clone()
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.accept_handle.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    version: ProtocolVersion,
    script: &BrokerScript,
    journal: &Mutex<Journal>,
) -> io::Result<()> {
    let mut incoming = BytesMut::with_capacity(4096);
    loop {
        let request = loop {
            if let Some(request) = decode(version, &mut incoming)? {
                break request;
            }
            if stream.read_buf(&mut incoming).await? == 0 {
                return Ok(());
            }
        };

        let Some(replies) = respond(script, journal, request) else {
            return Ok(());
        };
        let mut outgoing = BytesMut::new();
        for reply in &replies {
            encode(version, reply, &mut outgoing)?;
        }
        stream.write_all(&outgoing).await?;
    }
}

fn invalid_data(e: impl std::fmt::Debug) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("{e:?}"))
}

/// Decode one request, or None until the buffer holds a whole packet
fn decode(version: ProtocolVersion, buffer: &mut BytesMut) -> io::Result<Option<Request>> {
    match version {
        ProtocolVersion::V3 => {
            use rumqttc::mqttbytes::{v4, Error};

            let packet = match v4::read(buffer, MAX_PACKET_SIZE) {
                Ok(packet) => packet,
                Err(Error::InsufficientBytes(_)) => return Ok(None),
                Err(e) => return Err(invalid_data(e)),
            };
            Ok(Some(match packet {
                v4::Packet::Connect(_) => Request::Connect,
                v4::Packet::Subscribe(subscribe) => Request::Subscribe {
                    pkid: subscribe.pkid,
                    filters: subscribe
                        .filters
                        .into_iter()
                        .map(|filter| (filter.path, filter.qos.into()))
                        .collect(),
                },
                v4::Packet::Publish(publish) => Request::Publish {
                    pkid: publish.pkid,
                    qos: publish.qos.into(),
                    topic: publish.topic,
                    payload: publish.payload,
                },
                v4::Packet::PubRel(pubrel) => Request::PubRel(pubrel.pkid),
                v4::Packet::PingReq => Request::PingReq,
                v4::Packet::Disconnect => Request::Disconnect,
                _ => Request::Other,
            }))
        }
        ProtocolVersion::V5 => {
            use rumqttc::v5::mqttbytes::Error;
            use v5_packets::Packet;

            let packet = match Packet::read(buffer, Some(MAX_PACKET_SIZE)) {
                Ok(packet) => packet,
                Err(Error::InsufficientBytes(_)) => return Ok(None),
                Err(e) => return Err(invalid_data(e)),
            };
            Ok(Some(match packet {
                Packet::Connect(..) => Request::Connect,
                Packet::Subscribe(subscribe) => Request::Subscribe {
                    pkid: subscribe.pkid,
                    filters: subscribe
                        .filters
                        .into_iter()
                        .map(|filter| (filter.path, filter.qos.into()))
                        .collect(),
                },
                Packet::Publish(publish) => Request::Publish {
                    pkid: publish.pkid,
                    qos: publish.qos.into(),
                    topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                    payload: publish.payload,
                },
                Packet::PubRel(pubrel) => Request::PubRel(pubrel.pkid),
                Packet::PingReq(_) => Request::PingReq,
                Packet::Disconnect(_) => Request::Disconnect,
                _ => Request::Other,
            }))
        }
    }
}

/// Replies to one request. None closes the connection.
fn respond(script: &BrokerScript, journal: &Mutex<Journal>, request: Request) -> Option<Vec<Reply>> {
    let mut journal = lock(journal);
    let replies = match request {
        Request::Connect => {
            journal.connections += 1;
            vec![Reply::ConnAck]
        }
        Request::Subscribe { pkid, filters } => {
            let mut granted = Vec::with_capacity(filters.len());
            let mut retained = Vec::new();
            for (filter, qos) in filters {
                let refused = script.rejected_filters.contains(&filter);
                granted.push((!refused).then_some(qos));
                if !refused {
                    retained.extend(
                        script
                            .retained
                            .iter()
                            .filter(|(topic_name, _)| topic::matches(&filter, topic_name))
                            .map(|(topic_name, payload)| Reply::Publish {
                                topic: topic_name.clone(),
                                payload: payload.clone(),
                            }),
                    );
                }
                journal.subscriptions.push(filter);
            }
            let mut replies = vec![Reply::SubAck { pkid, granted }];
            replies.extend(retained);
            replies
        }
        Request::Publish {
            pkid,
            qos,
            topic,
            payload,
        } => {
            let refused = script.rejected_topics.contains(&topic);
            journal.publishes.push((topic, payload));
            match qos {
                Qos::AtMostOnce => Vec::new(),
                Qos::AtLeastOnce => vec![Reply::PubAck { pkid, refused }],
                Qos::ExactlyOnce => vec![Reply::PubRec { pkid, refused }],
            }
        }
        Request::PubRel(pkid) => vec![Reply::PubComp(pkid)],
        Request::PingReq => vec![Reply::PingResp],
        Request::Disconnect => return None,
        Request::Other => Vec::new(),
    };
    Some(replies)
}

fn encode(version: ProtocolVersion, reply: &Reply, buffer: &mut BytesMut) -> io::Result<()> {
    match version {
        ProtocolVersion::V3 => encode_v3(reply, buffer)
            .map(|_| ())
            .map_err(invalid_data),
        ProtocolVersion::V5 => encode_v5(reply)
            .write(buffer)
            .map(|_| ())
            .map_err(invalid_data),
    }
}

// 3.1.1 has no publish reason codes, so refusals only affect MQTT 5
fn encode_v3(reply: &Reply, buffer: &mut BytesMut) -> Result<usize, rumqttc::mqttbytes::Error> {
    use rumqttc::mqttbytes::v4;

    match reply {
        Reply::ConnAck => v4::ConnAck::new(v4::ConnectReturnCode::Success, false).write(buffer),
        Reply::SubAck { pkid, granted } => v4::SubAck::new(
            *pkid,
            granted
                .iter()
                .map(|qos| match qos {
                    Some(qos) => v4::SubscribeReasonCode::Success((*qos).into()),
                    None => v4::SubscribeReasonCode::Failure,
                })
                .collect(),
        )
        .write(buffer),
        Reply::PubAck { pkid, .. } => v4::PubAck::new(*pkid).write(buffer),
        Reply::PubRec { pkid, .. } => v4::PubRec::new(*pkid).write(buffer),
        Reply::PubComp(pkid) => v4::PubComp::new(*pkid).write(buffer),
        Reply::Publish { topic, payload } => {
            v4::Publish::new(topic.as_str(), rumqttc::QoS::AtMostOnce, payload.to_vec())
                .write(buffer)
        }
        Reply::PingResp => v4::PingResp.write(buffer),
    }
}

fn encode_v5(reply: &Reply) -> v5_packets::Packet {
    use v5_packets::{Packet, PubAckReason, PubRecReason, SubscribeReasonCode};

    match reply {
        Reply::ConnAck => Packet::ConnAck(v5_packets::ConnAck {
            session_present: false,
            code: v5_packets::ConnectReturnCode::Success,
            properties: None,
        }),
        Reply::SubAck { pkid, granted } => Packet::SubAck(v5_packets::SubAck {
            pkid: *pkid,
            return_codes: granted
                .iter()
                .map(|qos| match qos {
                    Some(qos) => SubscribeReasonCode::Success((*qos).into()),
                    None => SubscribeReasonCode::NotAuthorized,
                })
                .collect(),
            properties: None,
        }),
        Reply::PubAck { pkid, refused } => Packet::PubAck(v5_packets::PubAck {
            pkid: *pkid,
            reason: if *refused {
                PubAckReason::NotAuthorized
            } else {
                PubAckReason::Success
            },
            properties: None,
        }),
        Reply::PubRec { pkid, refused } => Packet::PubRec(v5_packets::PubRec {
            pkid: *pkid,
            reason: if *refused {
                PubRecReason::NotAuthorized
            } else {
                PubRecReason::Success
            },
            properties: None,
        }),
        Reply::PubComp(pkid) => Packet::PubComp(v5_packets::PubComp::new(*pkid, None)),
        Reply::Publish { topic, payload } => Packet::Publish(v5_packets::Publish::new(
            topic.as_str(),
            rumqttc::v5::mqttbytes::QoS::AtMostOnce,
            payload.clone(),
            None,
        )),
        Reply::PingResp => Packet::PingResp(v5_packets::PingResp),
    }
}
