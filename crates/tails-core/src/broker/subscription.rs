//! Subscriber side of the broker.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use super::types::{Event, SubscriberId};

/// Handle to one registered subscriber.
///
/// Owns the receive end of the subscriber's delivery conduit. Dropping the
/// subscription asks the broker to remove it, so every exit path of the
/// owning session deregisters.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    events: mpsc::Receiver<Event>,
    leaves: mpsc::UnboundedSender<SubscriberId>,
}

impl Subscription {
    pub(crate) const fn new(
        id: SubscriberId,
        events: mpsc::Receiver<Event>,
        leaves: mpsc::UnboundedSender<SubscriberId>,
    ) -> Self {
        Self { id, events, leaves }
    }

    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the broker has removed this subscriber (evicted,
    /// preempted, or the broker stopped). Cancel safe.
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Take an already delivered event without waiting.
    pub fn try_recv(&mut self) -> Result<Event, TryRecvError> {
        self.events.try_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The broker may already be gone; nothing left to clean up then.
        let _ = self.leaves.send(self.id);
    }
}
