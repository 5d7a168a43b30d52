//! Durable notification storage boundary.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use custody_core::{NotificationId, UserId};

use super::model::{NewNotification, Notification, NotificationQuery};

/// Notification store error.
///
/// `NotFound` covers both an unknown id and an id owned by another user, so
/// callers cannot probe for other users' rows. It is never used for I/O
/// failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotificationStoreError {
    #[error("notification not found: {0}")]
    NotFound(NotificationId),

    #[error("storage error: {0}")]
    Storage(String),
}

impl NotificationStoreError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Relational persistence of per-recipient notification rows.
///
/// Every mutation is scoped by the recipient: a row can only be read, marked
/// or deleted through its owner's `UserId`. Calls are synchronous and may
/// block on I/O.
pub trait NotificationStore: Send + Sync {
    /// Persist a row, assigning its id and `created_at`.
    fn create(&self, notification: NewNotification) -> Result<Notification, NotificationStoreError>;

    /// Non-expired rows for `user_id`, newest first.
    fn list(
        &self,
        user_id: UserId,
        query: &NotificationQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, NotificationStoreError>;

    /// Unread, non-expired rows for `user_id`.
    fn unread_count(&self, user_id: UserId, now: DateTime<Utc>) -> Result<u64, NotificationStoreError>;

    /// Mark one owned row read. Idempotent: an already-read row is returned
    /// unchanged, keeping its original `read_at`.
    fn mark_read(
        &self,
        user_id: UserId,
        id: NotificationId,
        now: DateTime<Utc>,
    ) -> Result<Notification, NotificationStoreError>;

    /// Mark every unread row of `user_id` read; returns how many changed.
    fn mark_all_read(&self, user_id: UserId, now: DateTime<Utc>) -> Result<u64, NotificationStoreError>;

    fn delete(&self, user_id: UserId, id: NotificationId) -> Result<(), NotificationStoreError>;

    /// Delete rows of `user_id` created strictly before `cutoff`.
    fn delete_created_before(
        &self,
        user_id: UserId,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, NotificationStoreError>;

    /// Retention sweep: delete every expired row, for all users.
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, NotificationStoreError>;
}

impl<S> NotificationStore for Arc<S>
where
    S: NotificationStore + ?Sized,
{
    fn create(&self, notification: NewNotification) -> Result<Notification, NotificationStoreError> {
        (**self).create(notification)
    }

    fn list(
        &self,
        user_id: UserId,
        query: &NotificationQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, NotificationStoreError> {
        (**self).list(user_id, query, now)
    }

    fn unread_count(&self, user_id: UserId, now: DateTime<Utc>) -> Result<u64, NotificationStoreError> {
        (**self).unread_count(user_id, now)
    }

    fn mark_read(
        &self,
        user_id: UserId,
        id: NotificationId,
        now: DateTime<Utc>,
    ) -> Result<Notification, NotificationStoreError> {
        (**self).mark_read(user_id, id, now)
    }

    fn mark_all_read(&self, user_id: UserId, now: DateTime<Utc>) -> Result<u64, NotificationStoreError> {
        (**self).mark_all_read(user_id, now)
    }

    fn delete(&self, user_id: UserId, id: NotificationId) -> Result<(), NotificationStoreError> {
        (**self).delete(user_id, id)
    }

    fn delete_created_before(
        &self,
        user_id: UserId,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, NotificationStoreError> {
        (**self).delete_created_before(user_id, cutoff)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, NotificationStoreError> {
        (**self).purge_expired(now)
    }
}
