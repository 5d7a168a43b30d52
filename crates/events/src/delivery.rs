//! Live delivery seam used by producers.
//!
//! Live delivery is best-effort and never the system of record, so none of
//! these operations return errors. The [`DeliveryReport`] exists for logging
//! and tests.

use std::sync::Arc;

use custody_core::UserId;

use crate::envelope::EventEnvelope;

/// Outcome of one fan-out attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipients whose queue accepted the message.
    pub delivered: Vec<UserId>,
    /// Recipients whose queue was full (or whose receiver was gone); their
    /// connection has been closed.
    pub evicted: Vec<UserId>,
    /// Recipients with no live connection.
    pub offline: Vec<UserId>,
}

impl DeliveryReport {
    /// True when nobody was addressed at all.
    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty() && self.evicted.is_empty() && self.offline.is_empty()
    }

    pub fn merge(&mut self, other: DeliveryReport) {
        self.delivered.extend(other.delivered);
        self.evicted.extend(other.evicted);
        self.offline.extend(other.offline);
    }
}

/// Non-blocking push of envelopes to connected users.
pub trait LiveDelivery: Send + Sync {
    /// Deliver to every recipient the routing policy resolves.
    fn broadcast(&self, envelope: &EventEnvelope) -> DeliveryReport;

    /// Deliver to exactly one user, ignoring routing.
    fn send_to_user(&self, user_id: UserId, envelope: &EventEnvelope) -> DeliveryReport;

    fn is_connected(&self, user_id: UserId) -> bool;

    /// Users with a live connection, ascending.
    fn connected_users(&self) -> Vec<UserId>;
}

impl<L> LiveDelivery for Arc<L>
where
    L: LiveDelivery + ?Sized,
{
    fn broadcast(&self, envelope: &EventEnvelope) -> DeliveryReport {
        (**self).broadcast(envelope)
    }

    fn send_to_user(&self, user_id: UserId, envelope: &EventEnvelope) -> DeliveryReport {
        (**self).send_to_user(user_id, envelope)
    }

    fn is_connected(&self, user_id: UserId) -> bool {
        (**self).is_connected(user_id)
    }

    fn connected_users(&self) -> Vec<UserId> {
        (**self).connected_users()
    }
}
