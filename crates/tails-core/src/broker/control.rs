//! The broker control loop.
//!
//! One task owns the registry and processes joins, leaves and publishes
//! one at a time. Leaves are drained with priority so a disconnected
//! subscriber is gone before the next event is dispatched.

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::registry::{Admission, Registry};
use super::types::{BrokerConfig, BrokerError, BrokerStats, DeliveryPolicy, Event, SubscriberId};

/// Ordered requests from broker handles.
pub(crate) enum Request {
    Join {
        id: SubscriberId,
        conduit: mpsc::Sender<Event>,
        reply: oneshot::Sender<Result<(), BrokerError>>,
    },
    Publish(Event),
    Stats(oneshot::Sender<BrokerStats>),
}

pub(crate) struct BrokerState {
    registry: Registry,
    delivery: DeliveryPolicy,
    stats: BrokerStats,
}

impl BrokerState {
    pub(crate) fn new(config: &BrokerConfig) -> Self {
        Self {
            registry: Registry::new(config.max_subscribers, config.capacity_policy),
            delivery: config.delivery,
            stats: BrokerStats::default(),
        }
    }

    /// Run until every broker handle is dropped.
    pub(crate) async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut leaves: mpsc::UnboundedReceiver<SubscriberId>,
    ) {
        debug!("Broker loop started");
        loop {
            tokio::select! {
                biased;
                Some(id) = leaves.recv() => self.leave(id),
                request = requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
            }
        }
        info!(subscribers = self.registry.len(), "Broker stopped");
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::Join { id, conduit, reply } => {
                let result = self.join(id, conduit);
                // Requester gave up; its subscription drop queues the leave.
                let _ = reply.send(result);
            }
            Request::Publish(event) => self.dispatch(event).await,
            Request::Stats(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn join(&mut self, id: SubscriberId, conduit: mpsc::Sender<Event>) -> Result<(), BrokerError> {
        match self.registry.join(id, conduit) {
            Ok(Admission::Added) => {
                info!(
                    subscriber = %id,
                    subscribers = self.registry.len(),
                    "Subscriber joined"
                );
                Ok(())
            }
            Ok(Admission::AlreadyPresent) => {
                debug!(subscriber = %id, "Subscriber already registered");
                Ok(())
            }
            Ok(Admission::Preempted(oldest)) => {
                self.stats.evicted += 1;
                info!(
                    subscriber = %id,
                    preempted = %oldest,
                    subscribers = self.registry.len(),
                    "Subscriber joined, oldest subscriber preempted"
                );
                Ok(())
            }
            Err(e) => {
                warn!(subscriber = %id, error = %e, "Subscriber rejected");
                Err(e)
            }
        }
    }

    fn leave(&mut self, id: SubscriberId) {
        if self.registry.leave(id) {
            info!(
                subscriber = %id,
                subscribers = self.registry.len(),
                "Subscriber left"
            );
        } else {
            debug!(subscriber = %id, "Leave for unknown subscriber ignored");
        }
    }

    async fn dispatch(&mut self, event: Event) {
        self.stats.published += 1;

        let mut closed = Vec::new();
        let mut slow = Vec::new();

        match self.delivery {
            DeliveryPolicy::Drop => {
                for (id, conduit) in self.registry.iter() {
                    match conduit.try_send(event.clone()) {
                        Ok(()) => self.stats.delivered += 1,
                        Err(TrySendError::Full(_)) => {
                            self.stats.dropped += 1;
                            debug!(subscriber = %id, "Subscriber buffer full, event dropped");
                        }
                        Err(TrySendError::Closed(_)) => closed.push(id),
                    }
                }
            }
            DeliveryPolicy::Evict { timeout } => {
                for (id, conduit) in self.registry.iter() {
                    match tokio::time::timeout(timeout, conduit.send(event.clone())).await {
                        Ok(Ok(())) => self.stats.delivered += 1,
                        Ok(Err(_)) => closed.push(id),
                        Err(_) => slow.push(id),
                    }
                }
            }
        }

        for id in closed {
            if self.registry.leave(id) {
                debug!(subscriber = %id, "Subscriber conduit closed, removed");
            }
        }
        for id in slow {
            if self.registry.leave(id) {
                self.stats.evicted += 1;
                warn!(
                    subscriber = %id,
                    subscribers = self.registry.len(),
                    "Slow subscriber evicted"
                );
            }
        }
    }

    fn snapshot(&self) -> BrokerStats {
        BrokerStats {
            subscribers: self.registry.len(),
            ..self.stats.clone()
        }
    }
}
