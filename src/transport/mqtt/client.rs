//! Impure I/O operations for the MQTT sessions
//!
//! [`RumqttcSession`] owns the rumqttc client handle and a background task that
//! polls the event loop and feeds routed events into the shared [`SessionCore`].
//! It is written once over [`Protocol`]; [`V3Session`] and [`V5Session`] pick
//! the generation.
//!
//! A broker rejection under MQTT 5 makes rumqttc drop the connection and
//! reconnect on the next poll. The driver fails only the rejected request,
//! keeps the session connected and sends the surviving SUBSCRIBEs again.

use super::connection::{BrokerAddress, ConnectionState, MqttError};
use super::inflight::SubscribeWaiter;
use super::message_handler::EventRoute;
use super::protocol::{PollFailure, Protocol, V3, V5};
use super::session::SessionCore;
use crate::command::{ProtocolVersion, Qos};
use crate::transport::{MessageHandler, PendingOutcome, PublishAck, Session};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the request channel between client handle and event loop
const REQUEST_CAPACITY: usize = 100;

/// Default time to wait for CONNACK
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time the event loop task gets to finish after DISCONNECT
const DRIVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// MQTT 3.1.1 session
pub type V3Session = RumqttcSession<V3>;
/// MQTT 5 session
pub type V5Session = RumqttcSession<V5>;

type Core<P> = SessionCore<<P as Protocol>::SubAck, <P as Protocol>::PubAck, <P as Protocol>::PubComp>;
type SharedClient<P> = Arc<Mutex<Option<<P as Protocol>::Client>>>;

/// Wait for the event loop task after DISCONNECT was queued
async fn join_driver(handle: JoinHandle<()>) {
    match tokio::time::timeout(DRIVER_SHUTDOWN_GRACE, handle).await {
        Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
        Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
        Err(_) => warn!("Event loop task didn't shut down gracefully, forcing abort"),
        _ => {}
    }
}

async fn wait_for_connack<P: Protocol>(
    event_loop: &mut P::EventLoop,
) -> Result<P::ConnAck, MqttError> {
    loop {
        let event = P::poll(event_loop)
            .await
            .map_err(|e| MqttError::ConnectionFailed(Box::new(e)))?;
        if let Some(connack) = P::connack(&event) {
            return Ok(connack);
        }
    }
}

/// Queue the waiter and hand SUBSCRIBE to the event loop. Callers hold the client lock.
async fn send_subscribe<P: Protocol>(
    client: &P::Client,
    core: &Core<P>,
    waiter: SubscribeWaiter<P::SubAck>,
) {
    let filter = waiter.filter.clone();
    let qos = waiter.qos;
    core.inflight().enqueue_subscribe(waiter);
    if let Err(e) = P::subscribe(client, &filter, qos).await {
        core.remove_subscription(&filter);
        if let Some(tx) = core.inflight().cancel_last_subscribe() {
            let _ = tx.send(Err(MqttError::RequestFailed(e)));
        }
    }
}

fn resubscribe<P: Protocol>(
    client: SharedClient<P>,
    core: Arc<Core<P>>,
    waiters: Vec<SubscribeWaiter<P::SubAck>>,
) {
    if waiters.is_empty() {
        return;
    }

    tokio::spawn(async move {
        let guard = client.lock().await;
        let Some(client) = guard.as_ref() else {
            for tx in waiters.into_iter().filter_map(|waiter| waiter.tx) {
                let _ = tx.send(Err(MqttError::NotConnected { state: core.state() }));
            }
            return;
        };

        for waiter in waiters {
            send_subscribe::<P>(client, &core, waiter).await;
        }
    });
}

async fn run_event_loop<P: Protocol>(
    mut event_loop: P::EventLoop,
    client: SharedClient<P>,
    core: Arc<Core<P>>,
) {
    debug!(protocol = %P::VERSION, "Starting MQTT event loop");
    let mut rejections = Vec::new();

    loop {
        match P::poll(&mut event_loop).await {
            Ok(event) => match P::route(&event) {
                // The first CONNACK is consumed by connect, so this is a reconnect
                EventRoute::ConnectionAcknowledged { session_present } => {
                    for rejection in rejections.drain(..) {
                        core.reject(rejection);
                    }
                    let reissue = core.reconnected(session_present);
                    info!(
                        resubscribing = reissue.len(),
                        session_present, "Reconnected to MQTT broker"
                    );
                    resubscribe::<P>(client.clone(), core.clone(), reissue);
                }
                route => {
                    if !core.apply(route) {
                        break;
                    }
                }
            },
            Err(e) => match P::classify(&e) {
                PollFailure::Rejected(rejection) => {
                    warn!("Broker rejected a request, reconnecting: {}", e);
                    rejections.push(rejection);
                }
                PollFailure::Lost(reason) => {
                    error!("MQTT event loop error: {}", reason);
                    for rejection in rejections.drain(..) {
                        core.reject(rejection);
                    }
                    core.connection_lost(&reason);
                    break;
                }
            },
        }
    }
    debug!(protocol = %P::VERSION, "MQTT event loop stopped");
}

/// An MQTT session over rumqttc
pub struct RumqttcSession<P: Protocol> {
    broker: BrokerAddress,
    connect_timeout: Duration,
    client: SharedClient<P>,
    core: Arc<Core<P>>,
    event_loop_handle: Option<JoinHandle<()>>,
}

impl<P: Protocol> RumqttcSession<P> {
    pub fn new(broker: BrokerAddress) -> Self {
        Self {
            broker,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            client: Arc::new(Mutex::new(None)),
            core: Arc::new(Core::<P>::new()),
            event_loop_handle: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.core.state()
    }
}

#[async_trait]
impl<P: Protocol> Session for RumqttcSession<P> {
    type ConnectRequest = P::ConnectRequest;
    type ConnAck = P::ConnAck;
    type SubAck = P::SubAck;
    type PublishAck = PublishAck<P::PubAck, P::PubComp>;

    fn protocol(&self) -> ProtocolVersion {
        P::VERSION
    }

    async fn connect(&mut self, request: &P::ConnectRequest) -> Result<P::ConnAck, MqttError> {
        if self.core.is_connected() {
            return Err(MqttError::AlreadyConnected);
        }

        info!(host = %self.broker.host, port = self.broker.port, protocol = %P::VERSION, "Connecting to MQTT broker");
        let (client, mut event_loop) = P::create(&self.broker, request, REQUEST_CAPACITY);
        self.core.set_state(ConnectionState::Connecting);

        let connack = match tokio::time::timeout(
            self.connect_timeout,
            wait_for_connack::<P>(&mut event_loop),
        )
        .await
        {
            Ok(Ok(connack)) => connack,
            Ok(Err(e)) => {
                self.core.set_state(ConnectionState::Disconnected(e.to_string()));
                return Err(e);
            }
            Err(_) => {
                let e = MqttError::ConnAckTimeout {
                    timeout_secs: self.connect_timeout.as_secs(),
                };
                self.core.set_state(ConnectionState::Disconnected(e.to_string()));
                return Err(e);
            }
        };

        *self.client.lock().await = Some(client);
        self.core.set_state(ConnectionState::Connected);
        self.event_loop_handle = Some(tokio::spawn(run_event_loop::<P>(
            event_loop,
            self.client.clone(),
            self.core.clone(),
        )));

        Ok(connack)
    }

    fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    fn subscribe(&self, filter: &str, qos: Qos, handler: MessageHandler) -> PendingOutcome<P::SubAck> {
        let (tx, pending) = PendingOutcome::channel();
        let client = self.client.clone();
        let core = self.core.clone();
        let filter = filter.to_string();

        tokio::spawn(async move {
            let guard = client.lock().await;
            let Some(client) = guard.as_ref().filter(|_| core.is_connected()) else {
                let _ = tx.send(Err(MqttError::NotConnected { state: core.state() }));
                return;
            };

            core.add_subscription(&filter, qos, handler);
            send_subscribe::<P>(client, &core, SubscribeWaiter::new(&filter, qos, tx)).await;
        });

        pending
    }

    fn publish(
        &self,
        topic: &str,
        qos: Qos,
        retain: bool,
        payload: Bytes,
    ) -> PendingOutcome<Self::PublishAck> {
        let (tx, pending) = PendingOutcome::channel();
        let client = self.client.clone();
        let core = self.core.clone();
        let topic = topic.to_string();

        tokio::spawn(async move {
            let guard = client.lock().await;
            let Some(client) = guard.as_ref().filter(|_| core.is_connected()) else {
                let _ = tx.send(Err(MqttError::NotConnected { state: core.state() }));
                return;
            };

            core.inflight().enqueue_publish(qos, tx);
            if let Err(e) = P::publish(client, &topic, qos, retain, payload).await {
                if let Some(tx) = core.inflight().cancel_last_publish() {
                    let _ = tx.send(Err(MqttError::RequestFailed(e)));
                }
            }
        });

        pending
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        let client = self.client.lock().await.take();
        let result = match client {
            Some(client) => P::disconnect(&client).await.map_err(MqttError::RequestFailed),
            None => Ok(()),
        };

        if let Some(handle) = self.event_loop_handle.take() {
            if result.is_ok() {
                join_driver(handle).await;
            } else {
                handle.abort();
            }
        }
        self.core.connection_lost("Client disconnected");

        info!("MQTT client disconnected");
        result
    }
}

impl<P: Protocol> Drop for RumqttcSession<P> {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}
