//! Correlation of outgoing requests with their acknowledgements
//!
//! rumqttc assigns packet ids inside the event loop and reports them through
//! `Outgoing` events in request order. Waiters are queued in the same order the
//! requests are handed to the client, bound to a packet id when the matching
//! `Outgoing` event shows up, and resolved by the acknowledgement.
//!
//! An MQTT 5 rejection arrives as an event loop error without a packet id.
//! The broker answers requests of one kind in the order it received them, so
//! the rejection belongs to the oldest bound waiter of that kind.

use crate::command::Qos;
use crate::transport::{MqttError, OutcomeSender, PublishAck};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// A SUBSCRIBE waiting for its SUBACK. Re-issued subscriptions have no caller.
pub struct SubscribeWaiter<S> {
    pub filter: String,
    pub qos: Qos,
    pub tx: Option<OutcomeSender<S>>,
}

impl<S> SubscribeWaiter<S> {
    pub fn new(filter: &str, qos: Qos, tx: OutcomeSender<S>) -> Self {
        Self {
            filter: filter.to_string(),
            qos,
            tx: Some(tx),
        }
    }

    fn resolve(self, outcome: Result<S, MqttError>) -> String {
        match self.tx {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => match outcome {
                Ok(_) => debug!(filter = %self.filter, "Resubscribed"),
                Err(e) => warn!(filter = %self.filter, "Resubscription failed: {}", e),
            },
        }
        self.filter
    }
}

/// Acknowledgement an outgoing publish is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStage {
    /// QoS 1, waiting for PUBACK
    Acknowledge,
    /// QoS 2, waiting for PUBREC
    Receive,
    /// QoS 2 after PUBREC, waiting for PUBCOMP
    Complete,
}

struct PublishWaiter<A, C> {
    qos: Qos,
    received: bool,
    tx: OutcomeSender<PublishAck<A, C>>,
}

impl<A, C> PublishWaiter<A, C> {
    fn stage(&self) -> PublishStage {
        match (self.qos, self.received) {
            (Qos::ExactlyOnce, true) => PublishStage::Complete,
            (Qos::ExactlyOnce, false) => PublishStage::Receive,
            _ => PublishStage::Acknowledge,
        }
    }
}

struct Bound<W> {
    seq: u64,
    waiter: W,
}

fn oldest<W>(bound: &HashMap<u16, Bound<W>>, accept: impl Fn(&W) -> bool) -> Option<u16> {
    bound
        .iter()
        .filter(|(_, entry)| accept(&entry.waiter))
        .min_by_key(|(_, entry)| entry.seq)
        .map(|(pkid, _)| *pkid)
}

/// Pending subscribe and publish outcomes for one session
pub struct Inflight<S, A, C> {
    next_seq: u64,
    queued_subscribes: VecDeque<SubscribeWaiter<S>>,
    subscribes: HashMap<u16, Bound<SubscribeWaiter<S>>>,
    queued_publishes: VecDeque<PublishWaiter<A, C>>,
    publishes: HashMap<u16, Bound<PublishWaiter<A, C>>>,
}

impl<S, A, C> Default for Inflight<S, A, C> {
    fn default() -> Self {
        Self {
            next_seq: 0,
            queued_subscribes: VecDeque::new(),
            subscribes: HashMap::new(),
            queued_publishes: VecDeque::new(),
            publishes: HashMap::new(),
        }
    }
}

impl<S, A, C> Inflight<S, A, C> {
    pub fn new() -> Self {
        Self::default()
    }

    fn bind_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub fn enqueue_subscribe(&mut self, waiter: SubscribeWaiter<S>) {
        self.queued_subscribes.push_back(waiter);
    }

    /// Take back the most recently queued subscribe after its request failed to queue
    pub fn cancel_last_subscribe(&mut self) -> Option<OutcomeSender<S>> {
        self.queued_subscribes.pop_back().and_then(|waiter| waiter.tx)
    }

    /// Whether a SUBSCRIBE for `filter` is queued but not yet written
    pub fn is_queued(&self, filter: &str) -> bool {
        self.queued_subscribes.iter().any(|w| w.filter == filter)
    }

    pub fn subscribe_sent(&mut self, pkid: u16) {
        match self.queued_subscribes.pop_front() {
            Some(waiter) => {
                let seq = self.bind_seq();
                self.subscribes.insert(pkid, Bound { seq, waiter });
            }
            None => warn!(pkid, "SUBSCRIBE sent without a queued waiter"),
        }
    }

    /// Resolve the SUBSCRIBE bound to `pkid`, returning its filter
    pub fn resolve_subscribe(&mut self, pkid: u16, outcome: Result<S, MqttError>) -> Option<String> {
        match self.subscribes.remove(&pkid) {
            Some(entry) => Some(entry.waiter.resolve(outcome)),
            None => {
                warn!(pkid, "SUBACK for unknown packet id");
                None
            }
        }
    }

    /// Reject the oldest bound SUBSCRIBE, returning its filter
    pub fn reject_subscribe(&mut self, reason: &str) -> Option<String> {
        let Some(pkid) = oldest(&self.subscribes, |_| true) else {
            warn!("Subscribe rejection without an outstanding SUBSCRIBE: {}", reason);
            return None;
        };
        self.resolve_subscribe(pkid, Err(MqttError::Rejected(reason.to_string())))
    }

    /// Unbind every written SUBSCRIBE, oldest first. A reconnect loses them.
    pub fn unbind_subscribes(&mut self) -> Vec<SubscribeWaiter<S>> {
        let mut bound: Vec<Bound<SubscribeWaiter<S>>> =
            self.subscribes.drain().map(|(_, entry)| entry).collect();
        bound.sort_by_key(|entry| entry.seq);
        bound.into_iter().map(|entry| entry.waiter).collect()
    }

    pub fn enqueue_publish(&mut self, qos: Qos, tx: OutcomeSender<PublishAck<A, C>>) {
        self.queued_publishes.push_back(PublishWaiter {
            qos,
            received: false,
            tx,
        });
    }

    /// Take back the most recently queued publish after its request failed to queue
    pub fn cancel_last_publish(&mut self) -> Option<OutcomeSender<PublishAck<A, C>>> {
        self.queued_publishes.pop_back().map(|waiter| waiter.tx)
    }

    /// QoS 0 publishes complete here; others wait for their acknowledgement.
    /// A packet id that is already bound is a retransmission after reconnect.
    pub fn publish_sent(&mut self, pkid: u16) {
        if pkid != 0 && self.publishes.contains_key(&pkid) {
            debug!(pkid, "PUBLISH retransmitted");
            return;
        }

        let Some(waiter) = self.queued_publishes.pop_front() else {
            warn!(pkid, "PUBLISH sent without a queued waiter");
            return;
        };

        if waiter.qos == Qos::AtMostOnce {
            let _ = waiter.tx.send(Ok(PublishAck::Sent));
        } else {
            let seq = self.bind_seq();
            self.publishes.insert(pkid, Bound { seq, waiter });
        }
    }

    /// PUBREC arrived for a QoS 2 publish
    pub fn publish_received(&mut self, pkid: u16) {
        match self.publishes.get_mut(&pkid) {
            Some(entry) => entry.waiter.received = true,
            None => warn!(pkid, "PUBREC for unknown packet id"),
        }
    }

    pub fn resolve_publish(&mut self, pkid: u16, outcome: Result<PublishAck<A, C>, MqttError>) {
        match self.publishes.remove(&pkid) {
            Some(entry) => {
                let _ = entry.waiter.tx.send(outcome);
            }
            None => warn!(pkid, "Publish acknowledgement for unknown packet id"),
        }
    }

    /// Reject the oldest bound publish waiting at `stage`
    pub fn reject_publish(&mut self, stage: PublishStage, reason: &str) {
        match oldest(&self.publishes, |waiter| waiter.stage() == stage) {
            Some(pkid) => {
                self.resolve_publish(pkid, Err(MqttError::Rejected(reason.to_string())))
            }
            None => warn!(?stage, "Publish rejection without an outstanding PUBLISH: {}", reason),
        }
    }

    /// Fail every outstanding waiter, e.g. when the event loop stops
    pub fn fail_all(&mut self, reason: &str) {
        let subscribes = self
            .queued_subscribes
            .drain(..)
            .chain(self.subscribes.drain().map(|(_, entry)| entry.waiter));
        for waiter in subscribes {
            if let Some(tx) = waiter.tx {
                let _ = tx.send(Err(MqttError::ConnectionLost(reason.to_string())));
            }
        }

        let publishes = self
            .queued_publishes
            .drain(..)
            .chain(self.publishes.drain().map(|(_, entry)| entry.waiter));
        for waiter in publishes {
            let _ = waiter
                .tx
                .send(Err(MqttError::ConnectionLost(reason.to_string())));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.queued_subscribes.len()
            + self.subscribes.len()
            + self.queued_publishes.len()
            + self.publishes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PendingOutcome;

    type TestInflight = Inflight<&'static str, &'static str, &'static str>;

    fn subscribe_waiter(
        filter: &str,
    ) -> (SubscribeWaiter<&'static str>, PendingOutcome<&'static str>) {
        let (tx, pending) = PendingOutcome::channel();
        (SubscribeWaiter::new(filter, Qos::AtLeastOnce, tx), pending)
    }

    #[tokio::test]
    async fn test_subscribes_bind_in_request_order() {
        let mut inflight = TestInflight::new();
        let (waiter_a, pending_a) = subscribe_waiter("a");
        let (waiter_b, pending_b) = subscribe_waiter("b");
        inflight.enqueue_subscribe(waiter_a);
        inflight.enqueue_subscribe(waiter_b);

        inflight.subscribe_sent(1);
        inflight.subscribe_sent(2);
        assert_eq!(inflight.resolve_subscribe(2, Ok("second")).as_deref(), Some("b"));
        assert_eq!(inflight.resolve_subscribe(1, Ok("first")).as_deref(), Some("a"));

        assert_eq!(pending_a.resolve().await.unwrap(), "first");
        assert_eq!(pending_b.resolve().await.unwrap(), "second");
        assert_eq!(inflight.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_qos0_publish_completes_when_sent() {
        let mut inflight = TestInflight::new();
        let (tx, pending) = PendingOutcome::channel();
        inflight.enqueue_publish(Qos::AtMostOnce, tx);

        inflight.publish_sent(0);

        assert_eq!(pending.resolve().await.unwrap(), PublishAck::Sent);
        assert_eq!(inflight.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_qos1_publish_waits_for_acknowledgement() {
        let mut inflight = TestInflight::new();
        let (tx, pending) = PendingOutcome::channel();
        inflight.enqueue_publish(Qos::AtLeastOnce, tx);

        inflight.publish_sent(42);
        assert_eq!(inflight.pending_count(), 1);

        inflight.resolve_publish(42, Ok(PublishAck::Acknowledged("puback")));
        assert_eq!(
            pending.resolve().await.unwrap(),
            PublishAck::Acknowledged("puback")
        );
    }

    #[tokio::test]
    async fn test_mixed_qos_publishes_keep_request_order() {
        let mut inflight = TestInflight::new();
        let (tx_a, pending_a) = PendingOutcome::channel();
        let (tx_b, pending_b) = PendingOutcome::channel();
        inflight.enqueue_publish(Qos::ExactlyOnce, tx_a);
        inflight.enqueue_publish(Qos::AtMostOnce, tx_b);

        inflight.publish_sent(5);
        inflight.publish_sent(0);
        assert_eq!(pending_b.resolve().await.unwrap(), PublishAck::Sent);

        inflight.resolve_publish(5, Ok(PublishAck::Completed("pubcomp")));
        assert_eq!(
            pending_a.resolve().await.unwrap(),
            PublishAck::Completed("pubcomp")
        );
    }

    #[tokio::test]
    async fn test_cancel_last_returns_newest_waiter() {
        let mut inflight = TestInflight::new();
        let (waiter_a, _pending_a) = subscribe_waiter("a");
        let (waiter_b, pending_b) = subscribe_waiter("b");
        inflight.enqueue_subscribe(waiter_a);
        inflight.enqueue_subscribe(waiter_b);

        let cancelled = inflight.cancel_last_subscribe().unwrap();
        cancelled
            .send(Err(MqttError::Rejected("queue full".into())))
            .unwrap();

        assert!(matches!(pending_b.resolve().await, Err(MqttError::Rejected(_))));
        assert_eq!(inflight.pending_count(), 1);
        assert!(inflight.is_queued("a"));
        assert!(!inflight.is_queued("b"));
    }

    #[tokio::test]
    async fn test_fail_all_resolves_every_waiter() {
        let mut inflight = TestInflight::new();
        let (sub_bound, pending_sub_bound) = subscribe_waiter("bound");
        let (sub_queued, pending_sub_queued) = subscribe_waiter("queued");
        let (pub_bound, pending_pub_bound) = PendingOutcome::channel();
        inflight.enqueue_subscribe(sub_bound);
        inflight.subscribe_sent(1);
        inflight.enqueue_subscribe(sub_queued);
        inflight.enqueue_publish(Qos::AtLeastOnce, pub_bound);
        inflight.publish_sent(2);

        inflight.fail_all("network reset");

        for result in [
            pending_sub_queued.resolve().await.map(|_| ()),
            pending_sub_bound.resolve().await.map(|_| ()),
            pending_pub_bound.resolve().await.map(|_| ()),
        ] {
            assert!(matches!(result, Err(MqttError::ConnectionLost(ref r)) if r == "network reset"));
        }
        assert_eq!(inflight.pending_count(), 0);
    }

    #[test]
    fn test_unknown_acknowledgements_are_ignored() {
        let mut inflight = TestInflight::new();
        inflight.subscribe_sent(1);
        assert_eq!(inflight.resolve_subscribe(1, Ok("late")), None);
        inflight.publish_sent(2);
        inflight.publish_received(2);
        inflight.resolve_publish(2, Ok(PublishAck::Sent));
        assert_eq!(inflight.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_rejection_hits_oldest_bound_waiter() {
        let mut inflight = TestInflight::new();
        let (waiter_a, pending_a) = subscribe_waiter("denied/#");
        let (waiter_b, pending_b) = subscribe_waiter("allowed/#");
        inflight.enqueue_subscribe(waiter_a);
        inflight.enqueue_subscribe(waiter_b);
        // Packet ids wrap, so binding order decides, not the id
        inflight.subscribe_sent(9);
        inflight.subscribe_sent(3);

        let filter = inflight.reject_subscribe("SubAck reason code: NotAuthorized");

        assert_eq!(filter.as_deref(), Some("denied/#"));
        assert!(matches!(
            pending_a.resolve().await,
            Err(MqttError::Rejected(reason)) if reason.contains("NotAuthorized")
        ));
        inflight.resolve_subscribe(3, Ok("granted"));
        assert_eq!(pending_b.resolve().await.unwrap(), "granted");
    }

    #[test]
    fn test_subscribe_rejection_without_waiter_is_ignored() {
        let mut inflight = TestInflight::new();
        assert_eq!(inflight.reject_subscribe("NotAuthorized"), None);
    }

    #[test]
    fn test_unbind_subscribes_returns_oldest_first() {
        let mut inflight = TestInflight::new();
        let (waiter_a, _pending_a) = subscribe_waiter("first");
        let (waiter_b, _pending_b) = subscribe_waiter("second");
        let (waiter_c, _pending_c) = subscribe_waiter("queued");
        inflight.enqueue_subscribe(waiter_a);
        inflight.enqueue_subscribe(waiter_b);
        inflight.subscribe_sent(2);
        inflight.subscribe_sent(1);
        inflight.enqueue_subscribe(waiter_c);

        let unbound: Vec<String> = inflight
            .unbind_subscribes()
            .into_iter()
            .map(|waiter| waiter.filter)
            .collect();

        assert_eq!(unbound, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(inflight.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_rejection_matches_waiting_stage() {
        let mut inflight = TestInflight::new();
        let (tx_qos2, pending_qos2) = PendingOutcome::channel();
        let (tx_qos1, pending_qos1) = PendingOutcome::channel();
        inflight.enqueue_publish(Qos::ExactlyOnce, tx_qos2);
        inflight.enqueue_publish(Qos::AtLeastOnce, tx_qos1);
        inflight.publish_sent(1);
        inflight.publish_sent(2);

        inflight.reject_publish(PublishStage::Acknowledge, "PubAck reason code: NotAuthorized");
        assert!(matches!(pending_qos1.resolve().await, Err(MqttError::Rejected(_))));

        inflight.publish_received(1);
        inflight.reject_publish(PublishStage::Receive, "PubRec reason code: QuotaExceeded");
        assert_eq!(inflight.pending_count(), 1);

        inflight.reject_publish(PublishStage::Complete, "PubComp reason code: PacketIdentifierNotFound");
        assert!(matches!(
            pending_qos2.resolve().await,
            Err(MqttError::Rejected(reason)) if reason.contains("PacketIdentifierNotFound")
        ));
        assert_eq!(inflight.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_retransmitted_publish_keeps_its_waiter() {
        let mut inflight = TestInflight::new();
        let (tx_a, pending_a) = PendingOutcome::channel();
        let (tx_b, pending_b) = PendingOutcome::channel();
        inflight.enqueue_publish(Qos::AtLeastOnce, tx_a);
        inflight.publish_sent(4);
        inflight.enqueue_publish(Qos::AtLeastOnce, tx_b);

        inflight.publish_sent(4);
        inflight.publish_sent(5);
        inflight.resolve_publish(4, Ok(PublishAck::Acknowledged("a")));
        inflight.resolve_publish(5, Ok(PublishAck::Acknowledged("b")));

        assert_eq!(pending_a.resolve().await.unwrap(), PublishAck::Acknowledged("a"));
        assert_eq!(pending_b.resolve().await.unwrap(), PublishAck::Acknowledged("b"));
    }
}
