//! Recipient resolution for live delivery.
//!
//! Routing is a pure function of the envelope. An envelope whose payload does
//! not fit its kind resolves to nobody; routing never fails.

use std::collections::BTreeSet;
use std::sync::Arc;

use custody_core::UserId;

use crate::envelope::{EventEnvelope, EventKind};
use crate::payload::EventPayload;

/// Maps an envelope to the set of users that should receive it live.
pub trait RoutingPolicy: Send + Sync {
    fn recipients(&self, envelope: &EventEnvelope) -> BTreeSet<UserId>;
}

impl<P> RoutingPolicy for Arc<P>
where
    P: RoutingPolicy + ?Sized,
{
    fn recipients(&self, envelope: &EventEnvelope) -> BTreeSet<UserId> {
        (**self).recipients(envelope)
    }
}

/// Default policy: explicit target first, otherwise the parties named by the
/// kind's payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct KindRoutingPolicy;

impl RoutingPolicy for KindRoutingPolicy {
    fn recipients(&self, envelope: &EventEnvelope) -> BTreeSet<UserId> {
        if let Some(target) = envelope.target_user_id() {
            return BTreeSet::from([target]);
        }

        match (envelope.kind(), envelope.payload()) {
            (EventKind::TransferCreated | EventKind::TransferUpdate, EventPayload::Transfer(t)) => {
                BTreeSet::from([t.from_user_id, t.to_user_id])
            }
            (EventKind::PropertyUpdate, EventPayload::Property(p)) => {
                p.owner_id.into_iter().collect()
            }
            (
                EventKind::ConnectionRequest | EventKind::ConnectionAccepted,
                EventPayload::Connection(c),
            ) => BTreeSet::from([c.from_user_id, c.target_user_id]),
            (EventKind::DocumentReceived, EventPayload::Document(d)) => {
                BTreeSet::from([d.recipient_id])
            }
            _ => BTreeSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{ConnectionData, DocumentData, GeneralData, PropertyData, TransferData};

    fn user(n: i64) -> UserId {
        UserId::new(n)
    }

    fn transfer(from: i64, to: i64) -> TransferData {
        TransferData {
            transfer_id: 1,
            from_user_id: user(from),
            to_user_id: user(to),
            status: "approved".to_string(),
            serial_number: "SN-1".to_string(),
            item_name: "Radio".to_string(),
        }
    }

    fn property(owner: Option<i64>) -> PropertyData {
        PropertyData {
            property_id: 42,
            owner_id: owner.map(user),
            serial_number: "SN-42".to_string(),
            status: "operational".to_string(),
            action: "reassigned".to_string(),
        }
    }

    fn route(env: &EventEnvelope) -> Vec<i64> {
        KindRoutingPolicy.recipients(env).into_iter().map(|u| u.get()).collect()
    }

    #[test]
    fn transfer_kinds_reach_both_parties() {
        assert_eq!(route(&EventEnvelope::transfer_created(transfer(1, 2))), vec![1, 2]);
        assert_eq!(route(&EventEnvelope::transfer_update(transfer(3, 2))), vec![2, 3]);
    }

    #[test]
    fn self_transfer_is_delivered_once() {
        assert_eq!(route(&EventEnvelope::transfer_update(transfer(4, 4))), vec![4]);
    }

    #[test]
    fn property_update_reaches_owner_or_nobody() {
        assert_eq!(route(&EventEnvelope::property_update(property(Some(8)))), vec![8]);
        assert!(route(&EventEnvelope::property_update(property(None))).is_empty());
    }

    #[test]
    fn connection_kinds_reach_requester_and_target() {
        let data = ConnectionData {
            connection_id: 3,
            from_user_id: user(10),
            from_user_name: "SGT Doe".to_string(),
            target_user_id: user(11),
            status: "pending".to_string(),
        };
        assert_eq!(route(&EventEnvelope::connection_request(data.clone())), vec![10, 11]);
        assert_eq!(route(&EventEnvelope::connection_accepted(data)), vec![10, 11]);
    }

    #[test]
    fn document_reaches_recipient_only() {
        let data = DocumentData {
            document_id: 5,
            recipient_id: user(20),
            sender_id: user(21),
            document_type: "DA-2062".to_string(),
            title: "Hand receipt".to_string(),
        };
        assert_eq!(route(&EventEnvelope::document_received(data)), vec![20]);
    }

    #[test]
    fn explicit_target_overrides_kind_routing() {
        let env = EventEnvelope::transfer_created(transfer(1, 2)).with_target(user(99));
        assert_eq!(route(&env), vec![99]);
    }

    #[test]
    fn mismatched_payload_routes_to_nobody() {
        let env = EventEnvelope::new(EventKind::DocumentReceived, transfer(1, 2));
        assert!(route(&env).is_empty());

        let untargeted_general = EventEnvelope::new(
            EventKind::General,
            GeneralData {
                title: "t".to_string(),
                message: "m".to_string(),
                data: None,
            },
        );
        assert!(route(&untargeted_general).is_empty());
    }
}
