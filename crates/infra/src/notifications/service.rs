//! Notification service: the single call site producers use.
//!
//! ## Emission pipeline
//!
//! ```text
//! notify_*(..)
//!   ↓
//! 1. Build one canonical EventEnvelope
//!   ↓
//! 2. Live delivery through the hub (best-effort, logged, never an error)
//!   ↓
//! 3. One durable row per recipient, each written independently
//! ```
//!
//! The two paths are not transactional. A recipient who is
//! offline still gets a row; a row that fails to persist does not undo live
//! delivery. The store is the system of record.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use custody_core::{NotificationId, UserId};
use custody_events::{
    ConnectionData, DeliveryReport, DocumentData, EventEnvelope, EventKind, GeneralData,
    LiveDelivery, PropertyData, TransferData,
};

use super::model::{NewNotification, Notification, NotificationQuery, NotificationType, Priority};
use super::store::{NotificationStore, NotificationStoreError};

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification store error: {0}")]
    Store(#[from] NotificationStoreError),

    #[error("failed to persist notification for user {recipient}: {source}")]
    Persist {
        recipient: UserId,
        #[source]
        source: NotificationStoreError,
    },
}

impl NotificationError {
    /// True for unknown ids and ids owned by another user.
    pub fn is_not_found(&self) -> bool {
        match self {
            NotificationError::Store(e) | NotificationError::Persist { source: e, .. } => {
                e.is_not_found()
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotificationConfig {
    /// Applied as `expires_at = created + ttl` to rows without an explicit expiry.
    pub default_ttl: Option<Duration>,
}

/// A transfer between two users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferNotice {
    pub transfer_id: i64,
    pub property_id: i64,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub status: String,
    pub serial_number: String,
    pub item_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyNotice {
    pub property_id: i64,
    pub owner_id: Option<UserId>,
    pub name: String,
    pub serial_number: String,
    pub status: String,
    pub action: String,
}

/// A connection request (`from` asks `target`) or acceptance (`from`
/// accepted `target`'s earlier request). The durable row goes to `target`
/// in both cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionNotice {
    pub connection_id: i64,
    pub from_user_id: UserId,
    pub from_user_name: String,
    pub target_user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentNotice {
    pub document_id: i64,
    pub sender_id: UserId,
    pub sender_name: String,
    pub recipient_id: UserId,
    pub document_type: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneralNotice {
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub priority: Priority,
}

/// What one emission did.
#[derive(Debug, Clone)]
pub struct EmitOutcome {
    pub kind: EventKind,
    pub live: DeliveryReport,
    pub persisted: Vec<Notification>,
}

#[derive(Debug)]
pub struct NotificationService<S, L> {
    store: S,
    live: L,
    config: NotificationConfig,
}

impl<S, L> NotificationService<S, L> {
    pub fn new(store: S, live: L) -> Self {
        Self::with_config(store, live, NotificationConfig::default())
    }

    pub fn with_config(store: S, live: L, config: NotificationConfig) -> Self {
        Self { store, live, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn live(&self) -> &L {
        &self.live
    }
}

impl<S, L> NotificationService<S, L>
where
    S: NotificationStore,
    L: LiveDelivery,
{
    /// Deliver `envelope` live, then persist `rows` one by one.
    ///
    /// Envelopes with an explicit target go to that user only; all others are
    /// routed by kind. Every row is attempted; the first persistence failure
    /// is returned after the rest have been tried.
    pub fn emit(
        &self,
        envelope: EventEnvelope,
        rows: Vec<NewNotification>,
    ) -> Result<EmitOutcome, NotificationError> {
        let live = match envelope.target_user_id() {
            Some(user_id) => self.live.send_to_user(user_id, &envelope),
            None => self.live.broadcast(&envelope),
        };
        debug!(
            kind = %envelope.kind(),
            delivered = live.delivered.len(),
            evicted = live.evicted.len(),
            offline = live.offline.len(),
            "live delivery attempted"
        );

        let mut persisted = Vec::with_capacity(rows.len());
        let mut first_failure = None;
        for row in rows {
            let recipient = row.user_id;
            match self.store.create(self.apply_ttl(row)) {
                Ok(n) => persisted.push(n),
                Err(err) => {
                    warn!(kind = %envelope.kind(), recipient = %recipient, error = %err, "failed to persist notification");
                    first_failure.get_or_insert(NotificationError::Persist {
                        recipient,
                        source: err,
                    });
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(EmitOutcome {
                kind: envelope.kind(),
                live,
                persisted,
            }),
        }
    }

    /// New transfer request: both parties see it live, the receiver gets a
    /// high-priority row.
    pub fn notify_transfer_created(
        &self,
        notice: &TransferNotice,
    ) -> Result<EmitOutcome, NotificationError> {
        let envelope = EventEnvelope::transfer_created(transfer_data(notice, "pending"));
        let row = NewNotification::new(
            notice.to_user_id,
            NotificationType::TransferCreated,
            "New Transfer Request",
            format!(
                "You have a new transfer request for {} ({})",
                notice.item_name, notice.serial_number
            ),
        )
        .with_data(json!({
            "transferId": notice.transfer_id,
            "propertyId": notice.property_id,
            "serialNumber": notice.serial_number,
            "fromUserId": notice.from_user_id,
        }))
        .with_priority(Priority::High);

        self.emit(envelope, vec![row])
    }

    /// Transfer status change: both parties get a row with their own wording.
    pub fn notify_transfer_update(
        &self,
        notice: &TransferNotice,
    ) -> Result<EmitOutcome, NotificationError> {
        let envelope = EventEnvelope::transfer_update(transfer_data(notice, &notice.status));
        let title = format!("Transfer {}", notice.status);
        let data = json!({
            "transferId": notice.transfer_id,
            "propertyId": notice.property_id,
            "serialNumber": notice.serial_number,
            "status": notice.status,
        });

        let mut rows = vec![NewNotification::new(
            notice.from_user_id,
            NotificationType::TransferUpdate,
            title.clone(),
            format!(
                "Your transfer of {} ({}) has been {}",
                notice.item_name, notice.serial_number, notice.status
            ),
        )
        .with_data(data.clone())];

        if notice.to_user_id != notice.from_user_id {
            rows.push(
                NewNotification::new(
                    notice.to_user_id,
                    NotificationType::TransferUpdate,
                    title,
                    format!(
                        "Transfer of {} ({}) to you has been {}",
                        notice.item_name, notice.serial_number, notice.status
                    ),
                )
                .with_data(data),
            );
        }

        self.emit(envelope, rows)
    }

    /// Property change: only an assigned owner hears about it.
    pub fn notify_property_update(
        &self,
        notice: &PropertyNotice,
    ) -> Result<EmitOutcome, NotificationError> {
        let envelope = EventEnvelope::property_update(PropertyData {
            property_id: notice.property_id,
            owner_id: notice.owner_id,
            serial_number: notice.serial_number.clone(),
            status: notice.status.clone(),
            action: notice.action.clone(),
        });

        let Some(owner) = notice.owner_id else {
            debug!(property_id = notice.property_id, "property has no owner; nothing to notify");
            return self.emit(envelope, Vec::new());
        };

        let row = NewNotification::new(
            owner,
            NotificationType::PropertyUpdate,
            "Property Updated",
            format!(
                "Property {} ({}) has been updated",
                notice.name, notice.serial_number
            ),
        )
        .with_data(json!({
            "propertyId": notice.property_id,
            "serialNumber": notice.serial_number,
            "status": notice.status,
        }));

        self.emit(envelope, vec![row])
    }

    pub fn notify_connection_request(
        &self,
        notice: &ConnectionNotice,
    ) -> Result<EmitOutcome, NotificationError> {
        let envelope = EventEnvelope::connection_request(connection_data(notice, "pending"));
        let row = NewNotification::new(
            notice.target_user_id,
            NotificationType::ConnectionRequest,
            "New Connection Request",
            format!("{} wants to connect with you", notice.from_user_name),
        )
        .with_data(json!({
            "connectionId": notice.connection_id,
            "requesterId": notice.from_user_id,
            "requesterName": notice.from_user_name,
        }));

        self.emit(envelope, vec![row])
    }

    pub fn notify_connection_accepted(
        &self,
        notice: &ConnectionNotice,
    ) -> Result<EmitOutcome, NotificationError> {
        let envelope = EventEnvelope::connection_accepted(connection_data(notice, "accepted"));
        let row = NewNotification::new(
            notice.target_user_id,
            NotificationType::ConnectionAccepted,
            "Connection Accepted",
            format!("{} accepted your connection request", notice.from_user_name),
        )
        .with_data(json!({
            "connectionId": notice.connection_id,
            "acceptorId": notice.from_user_id,
            "acceptorName": notice.from_user_name,
        }));

        self.emit(envelope, vec![row])
    }

    pub fn notify_document_received(
        &self,
        notice: &DocumentNotice,
    ) -> Result<EmitOutcome, NotificationError> {
        let envelope = EventEnvelope::document_received(DocumentData {
            document_id: notice.document_id,
            recipient_id: notice.recipient_id,
            sender_id: notice.sender_id,
            document_type: notice.document_type.clone(),
            title: notice.title.clone(),
        });
        let row = NewNotification::new(
            notice.recipient_id,
            NotificationType::DocumentReceived,
            "New Document Received",
            format!("You received a {} from {}", notice.title, notice.sender_name),
        )
        .with_data(json!({
            "documentId": notice.document_id,
            "documentType": notice.document_type,
            "senderId": notice.sender_id,
            "senderName": notice.sender_name,
        }));

        self.emit(envelope, vec![row])
    }

    /// Direct message to one user, delivered with `send_to_user`.
    pub fn send_general_notification(
        &self,
        notice: &GeneralNotice,
    ) -> Result<EmitOutcome, NotificationError> {
        let envelope = EventEnvelope::general(
            notice.user_id,
            GeneralData {
                title: notice.title.clone(),
                message: notice.message.clone(),
                data: notice.data.clone(),
            },
        );
        let row = NewNotification::new(
            notice.user_id,
            NotificationType::General,
            notice.title.clone(),
            notice.message.clone(),
        )
        .with_data(notice.data.clone().unwrap_or_default())
        .with_priority(notice.priority);

        self.emit(envelope, vec![row])
    }

    pub fn get_user_notifications(
        &self,
        user_id: UserId,
        query: &NotificationQuery,
    ) -> Result<Vec<Notification>, NotificationError> {
        Ok(self.store.list(user_id, query, Utc::now())?)
    }

    pub fn get_unread_count(&self, user_id: UserId) -> Result<u64, NotificationError> {
        Ok(self.store.unread_count(user_id, Utc::now())?)
    }

    pub fn mark_as_read(
        &self,
        user_id: UserId,
        id: NotificationId,
    ) -> Result<Notification, NotificationError> {
        Ok(self.store.mark_read(user_id, id, Utc::now())?)
    }

    pub fn mark_all_as_read(&self, user_id: UserId) -> Result<u64, NotificationError> {
        Ok(self.store.mark_all_read(user_id, Utc::now())?)
    }

    pub fn delete_notification(
        &self,
        user_id: UserId,
        id: NotificationId,
    ) -> Result<(), NotificationError> {
        Ok(self.store.delete(user_id, id)?)
    }

    /// Delete the user's rows older than `days` days; returns how many went.
    pub fn clear_old_notifications(&self, user_id: UserId, days: u32) -> Result<u64, NotificationError> {
        let cutoff = cutoff_before(Utc::now(), days);
        Ok(self.store.delete_created_before(user_id, cutoff)?)
    }

    /// Retention sweep over every user's expired rows.
    pub fn purge_expired(&self) -> Result<u64, NotificationError> {
        Ok(self.store.purge_expired(Utc::now())?)
    }

    pub fn is_user_online(&self, user_id: UserId) -> bool {
        self.live.is_connected(user_id)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.live.connected_users()
    }

    fn apply_ttl(&self, mut row: NewNotification) -> NewNotification {
        if row.expires_at.is_none() {
            row.expires_at = self.config.default_ttl.map(|ttl| expiry_from(Utc::now(), ttl));
        }
        row
    }
}

fn expiry_from(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `days` days before `now`, saturating at the earliest representable time.
fn cutoff_before(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    Duration::try_days(i64::from(days))
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn transfer_data(notice: &TransferNotice, status: &str) -> TransferData {
    TransferData {
        transfer_id: notice.transfer_id,
        from_user_id: notice.from_user_id,
        to_user_id: notice.to_user_id,
        status: status.to_string(),
        serial_number: notice.serial_number.clone(),
        item_name: notice.item_name.clone(),
    }
}

fn connection_data(notice: &ConnectionNotice, status: &str) -> ConnectionData {
    ConnectionData {
        connection_id: notice.connection_id,
        from_user_id: notice.from_user_id,
        from_user_name: notice.from_user_name.clone(),
        target_user_id: notice.target_user_id,
        status: status.to_string(),
    }
}
