//! Mock implementations for testing
//!
//! [`MockSession`] implements [`Session`] without a broker. Outcomes are chosen
//! up front; inbound messages are injected with [`MockSession::deliver`].

use crate::command::{ProtocolVersion, Qos};
use crate::transport::{
    topic, ConnectionState, InboundMessage, MessageHandler, MqttError, PendingOutcome,
    ReasonCode, Session,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::fmt::MakeWriter;

/// CONNACK returned by [`MockSession::connect`]
#[derive(Debug, Clone, PartialEq)]
pub struct MockConnAck {
    pub code: String,
}

impl ReasonCode for MockConnAck {
    fn reason_code(&self) -> String {
        self.code.clone()
    }
}

/// A publish seen by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPublish {
    pub topic: String,
    pub qos: Qos,
    pub retain: bool,
    pub payload: Bytes,
}

/// Mock session for testing
pub struct MockSession {
    protocol: ProtocolVersion,
    reason_code: String,
    connect_failure: Option<String>,
    connected_after_connect: bool,
    subscribe_rejection: Option<String>,
    publish_failure: Option<String>,
    connected: AtomicBool,
    connect_calls: AtomicUsize,
    handlers: Mutex<Vec<(String, MessageHandler)>>,
    subscriptions: Mutex<Vec<(String, Qos)>>,
    publishes: Mutex<Vec<RecordedPublish>>,
}

impl Default for MockSession {
    fn default() -> Self {
        Self {
            protocol: ProtocolVersion::V5,
            reason_code: "Success".to_string(),
            connect_failure: None,
            connected_after_connect: true,
            subscribe_rejection: None,
            publish_failure: None,
            connected: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            handlers: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            publishes: Mutex::new(Vec::new()),
        }
    }
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    /// Reason code carried by the CONNACK
    pub fn with_reason_code(mut self, code: &str) -> Self {
        self.reason_code = code.to_string();
        self
    }

    /// CONNACK arrives but the transport ends up disconnected
    pub fn disconnected_after_connect(mut self) -> Self {
        self.connected_after_connect = false;
        self
    }

    pub fn with_connect_failure(mut self, reason: &str) -> Self {
        self.connect_failure = Some(reason.to_string());
        self
    }

    pub fn with_subscribe_rejection(mut self, reason: &str) -> Self {
        self.subscribe_rejection = Some(reason.to_string());
        self
    }

    pub fn with_publish_failure(mut self, reason: &str) -> Self {
        self.publish_failure = Some(reason.to_string());
        self
    }

    /// Mark the session connected without a connect call
    pub fn connected(self) -> Self {
        self.connected.store(true, Ordering::SeqCst);
        self
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> Vec<(String, Qos)> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn publishes(&self) -> Vec<RecordedPublish> {
        self.publishes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deliver a message to every matching handler. Returns how many ran.
    pub fn deliver(&self, topic_name: &str, payload: impl Into<Bytes>) -> usize {
        let message = InboundMessage {
            topic: topic_name.to_string(),
            payload: payload.into(),
            qos: Qos::AtMostOnce,
            retain: false,
        };
        let handlers: Vec<MessageHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(filter, _)| topic::matches(filter, topic_name))
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in &handlers {
            handler(&message);
        }
        handlers.len()
    }
}

#[async_trait]
impl Session for MockSession {
    type ConnectRequest = ();
    type ConnAck = MockConnAck;
    type SubAck = Vec<Qos>;
    type PublishAck = ();

    fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    async fn connect(&mut self, _request: &()) -> Result<MockConnAck, MqttError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.connect_failure {
            return Err(MqttError::ConnectionFailed(Box::new(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                reason.clone(),
            ))));
        }

        self.connected
            .store(self.connected_after_connect, Ordering::SeqCst);
        Ok(MockConnAck {
            code: self.reason_code.clone(),
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self, filter: &str, qos: Qos, handler: MessageHandler) -> PendingOutcome<Vec<Qos>> {
        if !self.is_connected() {
            return PendingOutcome::ready(Err(MqttError::NotConnected {
                state: ConnectionState::Idle,
            }));
        }

        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((filter.to_string(), handler));
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((filter.to_string(), qos));

        match &self.subscribe_rejection {
            Some(reason) => PendingOutcome::ready(Err(MqttError::Rejected(reason.clone()))),
            None => PendingOutcome::ready(Ok(vec![qos])),
        }
    }

    fn publish(&self, topic_name: &str, qos: Qos, retain: bool, payload: Bytes) -> PendingOutcome<()> {
        if !self.is_connected() {
            return PendingOutcome::ready(Err(MqttError::NotConnected {
                state: ConnectionState::Idle,
            }));
        }

        self.publishes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedPublish {
                topic: topic_name.to_string(),
                qos,
                retain,
                payload,
            });

        match &self.publish_failure {
            Some(reason) => PendingOutcome::ready(Err(MqttError::ConnectionLost(reason.clone()))),
            None => PendingOutcome::ready(Ok(())),
        }
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Cloneable in-memory writer, usable as a console or a log destination
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn contents(&self) -> String {
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SharedBuffer {
    type Writer = SharedBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Captures tracing output of the current thread while alive
pub struct LogCapture {
    buffer: SharedBuffer,
    _guard: tracing::subscriber::DefaultGuard,
}

impl LogCapture {
    pub fn start() -> Self {
        let buffer = SharedBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(buffer.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_target(false)
            .without_time()
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);

        Self {
            buffer,
            _guard: guard,
        }
    }

    pub fn contents(&self) -> String {
        self.buffer.contents()
    }

    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.lines_containing(needle).len()
    }
}
