//! Event broker and subscriber fan-out.
//!
//! A single control loop owns the subscriber registry. Sessions join and
//! leave through the [`Broker`] handle, the line source publishes through
//! it, and every registered subscriber receives each event in order.

mod control;
mod handle;
mod registry;
mod subscription;
mod types;

pub use handle::Broker;
pub use subscription::Subscription;
pub use types::{
    BrokerConfig, BrokerError, BrokerStats, CapacityPolicy, DeliveryPolicy, Event, SubscriberId,
};
