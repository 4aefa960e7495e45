//! Broker types.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Counter for generating process-unique subscriber IDs.
static SUBSCRIBER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// One tailed line, the unit of broadcast.
///
/// Cloning is cheap: every subscriber shares the same allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event(Arc<str>);

impl Event {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Event {
    fn from(line: String) -> Self {
        Self(line.into())
    }
}

impl From<&str> for Event {
    fn from(line: &str) -> Self {
        Self(line.into())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one subscriber in the broker registry.
///
/// IDs are allocated in increasing order, so a smaller ID means an older
/// subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub(crate) fn next() -> Self {
        Self(SUBSCRIBER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What the broker does when a subscriber cannot take an event right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryPolicy {
    /// Non-blocking send. A full conduit loses the event for that
    /// subscriber only; delivery to the others continues.
    #[default]
    Drop,
    /// Wait up to `timeout` for room in the conduit, then remove the
    /// subscriber from the registry.
    Evict { timeout: Duration },
}

/// What happens when a join arrives while the registry is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityPolicy {
    /// Refuse the newcomer with [`BrokerError::AtCapacity`].
    #[default]
    Reject,
    /// Remove the oldest subscriber to make room for the newcomer.
    Preempt,
}

/// Configuration for the event broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Capacity of the ingest queue between the line source and the broker.
    pub ingest_capacity: usize,
    /// Capacity of each subscriber's delivery conduit.
    pub subscriber_buffer: usize,
    /// Slow-subscriber handling.
    pub delivery: DeliveryPolicy,
    /// Maximum concurrent subscribers (`None` = unlimited).
    pub max_subscribers: Option<usize>,
    /// Behaviour when `max_subscribers` is reached.
    pub capacity_policy: CapacityPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            ingest_capacity: 64,
            subscriber_buffer: 256,
            delivery: DeliveryPolicy::default(),
            max_subscribers: None,
            capacity_policy: CapacityPolicy::default(),
        }
    }
}

impl BrokerConfig {
    /// Set the ingest queue capacity (at least 1).
    #[must_use]
    pub fn with_ingest_capacity(mut self, capacity: usize) -> Self {
        self.ingest_capacity = capacity.max(1);
        self
    }

    /// Set the per-subscriber buffer (at least 1).
    #[must_use]
    pub fn with_subscriber_buffer(mut self, buffer: usize) -> Self {
        self.subscriber_buffer = buffer.max(1);
        self
    }

    #[must_use]
    pub const fn with_delivery(mut self, delivery: DeliveryPolicy) -> Self {
        self.delivery = delivery;
        self
    }

    /// Limit the number of concurrent subscribers.
    #[must_use]
    pub const fn with_max_subscribers(mut self, max: usize, policy: CapacityPolicy) -> Self {
        self.max_subscribers = Some(max);
        self.capacity_policy = policy;
        self
    }
}

/// Broker counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    /// Subscribers currently registered.
    pub subscribers: usize,
    /// Events accepted from the ingest queue.
    pub published: u64,
    /// Event copies handed to subscriber conduits.
    pub delivered: u64,
    /// Event copies lost because a conduit was full.
    pub dropped: u64,
    /// Subscribers removed for being too slow or preempted.
    pub evicted: u64,
}

/// Broker errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Broker is not running")]
    Closed,

    #[error("Too many subscribers (max: {max})")]
    AtCapacity { max: usize },
}
