//! State shared between a session handle and its event loop driver
//!
//! The driver feeds every routed event into [`SessionCore::apply`]; the handle
//! reads connection state and registers waiters and subscriptions through it.

use super::connection::ConnectionState;
use super::inflight::{Inflight, SubscribeWaiter};
use super::message_handler::EventRoute;
use super::protocol::Rejection;
use crate::command::Qos;
use crate::transport::{topic, InboundMessage, MessageHandler, MqttError, PublishAck};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

struct Subscription {
    filter: String,
    qos: Qos,
    handler: MessageHandler,
}

/// Connection state, pending outcomes and message handlers of one session
pub struct SessionCore<S, A, C> {
    state_tx: watch::Sender<ConnectionState>,
    inflight: Mutex<Inflight<S, A, C>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S, A, C> Default for SessionCore<S, A, C> {
    fn default() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            state_tx,
            inflight: Mutex::new(Inflight::new()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }
}

impl<S, A, C> SessionCore<S, A, C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.state_tx.borrow(), ConnectionState::Connected)
    }

    pub fn inflight(&self) -> MutexGuard<'_, Inflight<S, A, C>> {
        lock(&self.inflight)
    }

    pub fn add_subscription(&self, filter: &str, qos: Qos, handler: MessageHandler) {
        lock(&self.subscriptions).push(Subscription {
            filter: filter.to_string(),
            qos,
            handler,
        });
    }

    /// Drop the newest handler registered for `filter`
    pub fn remove_subscription(&self, filter: &str) {
        let mut subscriptions = lock(&self.subscriptions);
        if let Some(index) = subscriptions.iter().rposition(|s| s.filter == filter) {
            subscriptions.remove(index);
        }
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.subscriptions).len()
    }

    /// Deliver a message to every handler whose filter matches its topic.
    /// Handlers run outside the registry lock.
    pub fn dispatch(&self, message: &InboundMessage) -> usize {
        let handlers: Vec<MessageHandler> = lock(&self.subscriptions)
            .iter()
            .filter(|s| topic::matches(&s.filter, &message.topic))
            .map(|s| s.handler.clone())
            .collect();

        if handlers.is_empty() {
            debug!(topic = %message.topic, "No subscription matches received message");
        }
        for handler in &handlers {
            handler(message);
        }
        handlers.len()
    }

    /// Mark the session disconnected and fail everything still waiting
    pub fn connection_lost(&self, reason: &str) {
        self.set_state(ConnectionState::Disconnected(reason.to_string()));
        self.inflight().fail_all(reason);
    }

    /// Fail the waiter a broker rejection belongs to. A refused subscription
    /// stops receiving messages.
    pub fn reject(&self, rejection: Rejection) {
        match rejection {
            Rejection::Subscribe(reason) => {
                let filter = self.inflight().reject_subscribe(&reason);
                if let Some(filter) = filter {
                    warn!(filter = %filter, "Broker rejected subscription: {}", reason);
                    self.remove_subscription(&filter);
                }
            }
            Rejection::Publish { stage, reason } => {
                self.inflight().reject_publish(stage, &reason);
            }
        }
    }

    /// The event loop reconnected after a rejection. Returns the SUBSCRIBEs to
    /// send again: those still waiting for SUBACK and, unless the broker kept
    /// the session, every registered filter.
    pub fn reconnected(&self, session_present: bool) -> Vec<SubscribeWaiter<S>> {
        self.set_state(ConnectionState::Connected);

        let mut inflight = self.inflight();
        let mut reissue = inflight.unbind_subscribes();
        if !session_present {
            for subscription in lock(&self.subscriptions).iter() {
                let covered = reissue.iter().any(|w| w.filter == subscription.filter)
                    || inflight.is_queued(&subscription.filter);
                if !covered {
                    reissue.push(SubscribeWaiter {
                        filter: subscription.filter.clone(),
                        qos: subscription.qos,
                        tx: None,
                    });
                }
            }
        }
        reissue
    }

    /// Apply a routed event. Returns false when the event loop should stop.
    pub fn apply(&self, route: EventRoute<S, PublishAck<A, C>>) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged { .. } => {
                self.set_state(ConnectionState::Connected);
                true
            }
            EventRoute::MessageReceived(message) => {
                self.dispatch(&message);
                true
            }
            EventRoute::SubscribeSent(pkid) => {
                self.inflight().subscribe_sent(pkid);
                true
            }
            EventRoute::SubscribeResolved { pkid, outcome } => {
                let rejected = outcome.is_err();
                let filter = self
                    .inflight()
                    .resolve_subscribe(pkid, outcome.map_err(MqttError::Rejected));
                if let (true, Some(filter)) = (rejected, filter) {
                    self.remove_subscription(&filter);
                }
                true
            }
            EventRoute::PublishSent(pkid) => {
                self.inflight().publish_sent(pkid);
                true
            }
            EventRoute::PublishReceived(pkid) => {
                self.inflight().publish_received(pkid);
                true
            }
            EventRoute::PublishResolved { pkid, ack } => {
                self.inflight().resolve_publish(pkid, Ok(ack));
                true
            }
            EventRoute::Disconnected(reason) => {
                warn!("{}", reason);
                self.connection_lost(&reason);
                false
            }
            EventRoute::DisconnectSent => {
                info!("Client disconnected");
                self.connection_lost("Client disconnected");
                false
            }
            EventRoute::InfrastructureEvent(event) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }
}
