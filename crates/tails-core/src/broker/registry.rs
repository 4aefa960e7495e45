//! Subscriber registry owned by the broker loop.

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use super::types::{BrokerError, CapacityPolicy, Event, SubscriberId};

/// Outcome of a successful join.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Admission {
    Added,
    AlreadyPresent,
    /// Added after removing the given (oldest) subscriber.
    Preempted(SubscriberId),
}

/// Membership set keyed by subscriber ID.
///
/// Only the broker task holds this, so no locking is involved.
pub(crate) struct Registry {
    members: BTreeMap<SubscriberId, mpsc::Sender<Event>>,
    max: Option<usize>,
    policy: CapacityPolicy,
}

impl Registry {
    pub(crate) const fn new(max: Option<usize>, policy: CapacityPolicy) -> Self {
        Self {
            members: BTreeMap::new(),
            max,
            policy,
        }
    }

    pub(crate) fn join(
        &mut self,
        id: SubscriberId,
        tx: mpsc::Sender<Event>,
    ) -> Result<Admission, BrokerError> {
        if self.members.contains_key(&id) {
            return Ok(Admission::AlreadyPresent);
        }

        let mut admission = Admission::Added;
        if let Some(max) = self.max
            && self.members.len() >= max
        {
            match self.policy {
                CapacityPolicy::Reject => return Err(BrokerError::AtCapacity { max }),
                CapacityPolicy::Preempt => {
                    // max == 0 leaves nothing to preempt
                    let (oldest, _) = self
                        .members
                        .pop_first()
                        .ok_or(BrokerError::AtCapacity { max })?;
                    admission = Admission::Preempted(oldest);
                }
            }
        }

        self.members.insert(id, tx);
        Ok(admission)
    }

    /// Remove a subscriber. Returns whether it was present.
    pub(crate) fn leave(&mut self, id: SubscriberId) -> bool {
        self.members.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (SubscriberId, &mpsc::Sender<Event>)> {
        self.members.iter().map(|(id, tx)| (*id, tx))
    }
}
