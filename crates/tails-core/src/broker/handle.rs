//! Cloneable handle to the running broker.

use tokio::sync::{mpsc, oneshot};

use super::control::{BrokerState, Request};
use super::subscription::Subscription;
use super::types::{BrokerConfig, BrokerError, BrokerStats, Event, SubscriberId};

/// Handle to the event broker.
///
/// The broker loop runs until every `Broker` clone is dropped; outstanding
/// subscriptions then see the end of their stream.
#[derive(Clone, Debug)]
pub struct Broker {
    requests: mpsc::Sender<Request>,
    leaves: mpsc::UnboundedSender<SubscriberId>,
    subscriber_buffer: usize,
}

impl Broker {
    /// Spawn the broker loop on the current tokio runtime.
    pub fn spawn(config: BrokerConfig) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(config.ingest_capacity.max(1));
        let (leaves_tx, leaves_rx) = mpsc::unbounded_channel();
        let state = BrokerState::new(&config);

        tokio::spawn(state.run(requests_rx, leaves_rx));

        Self {
            requests: requests_tx,
            leaves: leaves_tx,
            subscriber_buffer: config.subscriber_buffer.max(1),
        }
    }

    /// Spawn with default configuration.
    pub fn with_defaults() -> Self {
        Self::spawn(BrokerConfig::default())
    }

    /// Register a new subscriber.
    ///
    /// Resolves once the broker has added it, so the subscription receives
    /// exactly the events published after this call returns.
    pub async fn subscribe(&self) -> Result<Subscription, BrokerError> {
        let id = SubscriberId::next();
        let (conduit, events) = mpsc::channel(self.subscriber_buffer);
        // Built before the join goes out so a cancelled caller still leaves.
        let subscription = Subscription::new(id, events, self.leaves.clone());

        let (reply, ack) = oneshot::channel();
        self.requests
            .send(Request::Join { id, conduit, reply })
            .await
            .map_err(|_| BrokerError::Closed)?;
        ack.await.map_err(|_| BrokerError::Closed)??;

        Ok(subscription)
    }

    /// Remove a subscriber. Unknown or already removed IDs are ignored.
    pub fn leave(&self, id: SubscriberId) {
        let _ = self.leaves.send(id);
    }

    /// Queue an event for fan-out, waiting for room in the ingest queue.
    pub async fn publish(&self, event: impl Into<Event>) -> Result<(), BrokerError> {
        self.requests
            .send(Request::Publish(event.into()))
            .await
            .map_err(|_| BrokerError::Closed)
    }

    /// Snapshot of the broker counters, taken after every earlier request.
    pub async fn stats(&self) -> Result<BrokerStats, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Stats(reply))
            .await
            .map_err(|_| BrokerError::Closed)?;
        rx.await.map_err(|_| BrokerError::Closed)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;
    use crate::broker::{CapacityPolicy, DeliveryPolicy};

    fn drain(subscription: &mut Subscription) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(event) = subscription.try_recv() {
            lines.push(event.to_string());
        }
        lines
    }

    #[tokio::test]
    async fn two_subscribers_receive_all_lines_in_order() {
        let broker = Broker::with_defaults();
        let mut a = broker.subscribe().await.unwrap();
        let mut b = broker.subscribe().await.unwrap();

        for line in ["line1", "line2", "line3"] {
            broker.publish(line).await.unwrap();
        }
        // Stats is ordered after the publishes.
        assert_eq!(broker.stats().await.unwrap().published, 3);

        assert_eq!(drain(&mut a), vec!["line1", "line2", "line3"]);
        assert_eq!(drain(&mut b), vec!["line1", "line2", "line3"]);
    }

    #[tokio::test]
    async fn late_joiner_gets_no_replay() {
        let broker = Broker::with_defaults();
        let mut a = broker.subscribe().await.unwrap();

        broker.publish("x").await.unwrap();
        let mut b = broker.subscribe().await.unwrap();
        broker.publish("y").await.unwrap();
        broker.stats().await.unwrap();

        assert_eq!(drain(&mut a), vec!["x", "y"]);
        assert_eq!(drain(&mut b), vec!["y"]);
    }

    #[tokio::test]
    async fn order_preserved_over_many_events() {
        let broker = Broker::spawn(BrokerConfig::default().with_subscriber_buffer(1024));
        let mut sub = broker.subscribe().await.unwrap();

        let producer = broker.clone();
        let task = tokio::spawn(async move {
            for i in 0..500 {
                producer.publish(format!("line-{i}")).await.unwrap();
            }
        });

        for i in 0..500 {
            let event = sub.recv().await.unwrap();
            assert_eq!(event.as_str(), format!("line-{i}"));
        }
        task.await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_and_unknown_leave_are_harmless() {
        let broker = Broker::with_defaults();
        let mut a = broker.subscribe().await.unwrap();
        let b = broker.subscribe().await.unwrap();
        let b_id = b.id();

        broker.leave(b_id);
        broker.leave(b_id);
        drop(b); // drop guard sends a third leave
        broker.leave(SubscriberId::next());

        broker.publish("still here").await.unwrap();
        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.subscribers, 1);
        assert_eq!(drain(&mut a), vec!["still here"]);
    }

    #[tokio::test]
    async fn dropped_subscriber_is_removed_before_next_event() {
        let broker = Broker::with_defaults();
        let mut healthy = broker.subscribe().await.unwrap();
        let mut leaving = broker.subscribe().await.unwrap();

        broker.publish("x").await.unwrap();
        assert_eq!(leaving.recv().await.unwrap().as_str(), "x");
        drop(leaving);

        broker.publish("y").await.unwrap();
        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.subscribers, 1);
        assert_eq!(stats.delivered, 3);
        assert_eq!(drain(&mut healthy), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn full_subscriber_drops_without_blocking_others() {
        let broker = Broker::spawn(BrokerConfig::default().with_subscriber_buffer(2));
        let mut stalled = broker.subscribe().await.unwrap();
        let mut healthy = broker.subscribe().await.unwrap();

        for i in 0..5 {
            broker.publish(format!("e{i}")).await.unwrap();
            assert_eq!(healthy.recv().await.unwrap().as_str(), format!("e{i}"));
        }

        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.subscribers, 2);
        assert_eq!(drain(&mut stalled), vec!["e0", "e1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_subscriber_evicted_after_timeout() {
        let config = BrokerConfig::default()
            .with_subscriber_buffer(1)
            .with_delivery(DeliveryPolicy::Evict {
                timeout: Duration::from_millis(100),
            });
        let broker = Broker::spawn(config);
        let mut stalled = broker.subscribe().await.unwrap();
        let mut healthy = broker.subscribe().await.unwrap();

        broker.publish("a").await.unwrap();
        assert_eq!(healthy.recv().await.unwrap().as_str(), "a");

        // stalled is full; this publish waits out the timeout then evicts it.
        broker.publish("b").await.unwrap();
        assert_eq!(healthy.recv().await.unwrap().as_str(), "b");

        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.subscribers, 1);

        assert_eq!(stalled.recv().await.unwrap().as_str(), "a");
        assert!(stalled.recv().await.is_none(), "evicted stream must end");
    }

    #[tokio::test]
    async fn reject_when_at_capacity() {
        let broker =
            Broker::spawn(BrokerConfig::default().with_max_subscribers(1, CapacityPolicy::Reject));
        let _first = broker.subscribe().await.unwrap();

        let second = broker.subscribe().await;
        assert!(matches!(second, Err(BrokerError::AtCapacity { max: 1 })));
        assert_eq!(broker.stats().await.unwrap().subscribers, 1);
    }

    #[tokio::test]
    async fn preempt_replaces_previous_viewer() {
        let broker =
            Broker::spawn(BrokerConfig::default().with_max_subscribers(1, CapacityPolicy::Preempt));
        let mut first = broker.subscribe().await.unwrap();
        let mut second = broker.subscribe().await.unwrap();

        broker.publish("only-second").await.unwrap();
        assert!(first.recv().await.is_none(), "preempted stream must end");
        assert_eq!(second.recv().await.unwrap().as_str(), "only-second");

        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.subscribers, 1);
        assert_eq!(stats.evicted, 1);
    }

    #[tokio::test]
    async fn subscriptions_end_when_broker_dropped() {
        let broker = Broker::with_defaults();
        let mut sub = broker.subscribe().await.unwrap();
        drop(broker);

        assert!(sub.recv().await.is_none());
        assert!(matches!(sub.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_counted() {
        let broker = Broker::with_defaults();
        broker.publish("nobody listening").await.unwrap();

        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.delivered, 0);
    }
}
