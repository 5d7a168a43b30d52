use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use custody_core::{NotificationId, UserId};

use super::model::{NewNotification, Notification, NotificationQuery};
use super::store::{NotificationStore, NotificationStoreError};

#[derive(Debug, Default)]
struct Rows {
    by_id: BTreeMap<NotificationId, Notification>,
    last_id: i64,
}

/// In-memory notification store.
///
/// Intended for tests/dev. Ids are assigned sequentially from 1.
#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    rows: RwLock<Rows>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Total rows held, expired ones included.
    pub fn len(&self) -> usize {
        self.read().map(|rows| rows.by_id.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Rows>, NotificationStoreError> {
        self.rows
            .read()
            .map_err(|_| NotificationStoreError::storage("notification store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Rows>, NotificationStoreError> {
        self.rows
            .write()
            .map_err(|_| NotificationStoreError::storage("notification store lock poisoned"))
    }
}

impl NotificationStore for InMemoryNotificationStore {
    fn create(&self, notification: NewNotification) -> Result<Notification, NotificationStoreError> {
        let mut rows = self.write()?;
        rows.last_id += 1;
        let row = Notification {
            id: NotificationId::new(rows.last_id),
            user_id: notification.user_id,
            notification_type: notification.notification_type,
            title: notification.title,
            message: notification.message,
            data: notification.data,
            priority: notification.priority,
            read: false,
            read_at: None,
            created_at: Utc::now(),
            expires_at: notification.expires_at,
        };
        rows.by_id.insert(row.id, row.clone());
        Ok(row)
    }

    fn list(
        &self,
        user_id: UserId,
        query: &NotificationQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, NotificationStoreError> {
        let rows = self.read()?;
        let mut visible: Vec<&Notification> = rows
            .by_id
            .values()
            .filter(|n| n.user_id == user_id && !n.is_expired(now))
            .filter(|n| !query.unread_only || !n.read)
            .collect();

        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(visible
            .into_iter()
            .skip(query.offset as usize)
            .take(query.effective_limit() as usize)
            .cloned()
            .collect())
    }

    fn unread_count(&self, user_id: UserId, now: DateTime<Utc>) -> Result<u64, NotificationStoreError> {
        let rows = self.read()?;
        let count = rows
            .by_id
            .values()
            .filter(|n| n.user_id == user_id && !n.read && !n.is_expired(now))
            .count();
        Ok(count as u64)
    }

    fn mark_read(
        &self,
        user_id: UserId,
        id: NotificationId,
        now: DateTime<Utc>,
    ) -> Result<Notification, NotificationStoreError> {
        let mut rows = self.write()?;
        let row = rows
            .by_id
            .get_mut(&id)
            .filter(|n| n.user_id == user_id)
            .ok_or(NotificationStoreError::NotFound(id))?;

        if !row.read {
            row.read = true;
            row.read_at = Some(now);
        }
        Ok(row.clone())
    }

    fn mark_all_read(&self, user_id: UserId, now: DateTime<Utc>) -> Result<u64, NotificationStoreError> {
        let mut rows = self.write()?;
        let mut changed = 0;
        for row in rows
            .by_id
            .values_mut()
            .filter(|n| n.user_id == user_id && !n.read && !n.is_expired(now))
        {
            row.read = true;
            row.read_at = Some(now);
            changed += 1;
        }
        Ok(changed)
    }

    fn delete(&self, user_id: UserId, id: NotificationId) -> Result<(), NotificationStoreError> {
        let mut rows = self.write()?;
        match rows.by_id.get(&id) {
            Some(n) if n.user_id == user_id => {
                rows.by_id.remove(&id);
                Ok(())
            }
            _ => Err(NotificationStoreError::NotFound(id)),
        }
    }

    fn delete_created_before(
        &self,
        user_id: UserId,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, NotificationStoreError> {
        let mut rows = self.write()?;
        let before = rows.by_id.len();
        rows.by_id
            .retain(|_, n| !(n.user_id == user_id && n.created_at < cutoff));
        Ok((before - rows.by_id.len()) as u64)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, NotificationStoreError> {
        let mut rows = self.write()?;
        let before = rows.by_id.len();
        rows.by_id.retain(|_, n| !n.is_expired(now));
        Ok((before - rows.by_id.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::model::{MAX_PAGE_LIMIT, NotificationType, Priority};
    use chrono::Duration;

    fn user(n: i64) -> UserId {
        UserId::new(n)
    }

    fn new_row(to: i64, title: &str) -> NewNotification {
        NewNotification::new(user(to), NotificationType::General, title, "body")
    }

    #[test]
    fn create_assigns_sequential_ids_and_unread_state() {
        let store = InMemoryNotificationStore::new();
        let a = store.create(new_row(1, "a")).unwrap();
        let b = store
            .create(new_row(1, "b").with_priority(Priority::High))
            .unwrap();

        assert_eq!(a.id, NotificationId::new(1));
        assert_eq!(b.id, NotificationId::new(2));
        assert!(!a.read && a.read_at.is_none());
        assert_eq!(b.priority, Priority::High);
    }

    #[test]
    fn list_is_newest_first_paginated_and_per_user() {
        let store = InMemoryNotificationStore::new();
        for i in 0..5 {
            store.create(new_row(1, &format!("n{i}"))).unwrap();
        }
        store.create(new_row(2, "other")).unwrap();
        let now = Utc::now();

        let all = store.list(user(1), &NotificationQuery::default(), now).unwrap();
        let titles: Vec<_> = all.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["n4", "n3", "n2", "n1", "n0"]);

        let page = store
            .list(user(1), &NotificationQuery::new(Some(2), Some(1), false), now)
            .unwrap();
        let titles: Vec<_> = page.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["n3", "n2"]);
    }

    #[test]
    fn expired_rows_are_hidden_and_not_counted() {
        let store = InMemoryNotificationStore::new();
        let now = Utc::now();
        store
            .create(new_row(1, "stale").with_expiry(now - Duration::minutes(1)))
            .unwrap();
        store
            .create(new_row(1, "fresh").with_expiry(now + Duration::days(1)))
            .unwrap();

        let listed = store.list(user(1), &NotificationQuery::default(), now).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "fresh");
        assert_eq!(store.unread_count(user(1), now).unwrap(), 1);

        assert_eq!(store.purge_expired(now).unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn mark_read_is_idempotent_and_keeps_first_read_at() {
        let store = InMemoryNotificationStore::new();
        let n = store.create(new_row(1, "a")).unwrap();
        let first = Utc::now();
        let later = first + Duration::hours(2);

        let once = store.mark_read(user(1), n.id, first).unwrap();
        let twice = store.mark_read(user(1), n.id, later).unwrap();

        assert!(once.read);
        assert_eq!(once.read_at, Some(first));
        assert_eq!(twice.read_at, Some(first));
        assert_eq!(store.unread_count(user(1), later).unwrap(), 0);
    }

    #[test]
    fn ownership_mismatch_is_not_found() {
        let store = InMemoryNotificationStore::new();
        let n = store.create(new_row(1, "a")).unwrap();

        assert_eq!(
            store.mark_read(user(2), n.id, Utc::now()).unwrap_err(),
            NotificationStoreError::NotFound(n.id)
        );
        assert!(store.delete(user(2), n.id).unwrap_err().is_not_found());
        assert!(store
            .delete(user(1), NotificationId::new(999))
            .unwrap_err()
            .is_not_found());

        store.delete(user(1), n.id).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn unread_only_and_mark_all_read() {
        let store = InMemoryNotificationStore::new();
        let a = store.create(new_row(1, "a")).unwrap();
        store.create(new_row(1, "b")).unwrap();
        store.create(new_row(2, "c")).unwrap();
        let now = Utc::now();

        store.mark_read(user(1), a.id, now).unwrap();
        let unread = store.list(user(1), &NotificationQuery::unread(), now).unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].title, "b");

        assert_eq!(store.mark_all_read(user(1), now).unwrap(), 1);
        assert_eq!(store.unread_count(user(1), now).unwrap(), 0);
        assert_eq!(store.unread_count(user(2), now).unwrap(), 1);
    }

    #[test]
    fn oversized_literal_query_is_capped() {
        let store = InMemoryNotificationStore::new();
        for i in 0..(MAX_PAGE_LIMIT + 20) {
            store.create(new_row(1, &format!("n{i}"))).unwrap();
        }
        let now = Utc::now();

        let huge = NotificationQuery {
            limit: 100_000,
            offset: 0,
            unread_only: false,
        };
        assert_eq!(store.list(user(1), &huge, now).unwrap().len(), MAX_PAGE_LIMIT as usize);

        let zero = NotificationQuery {
            limit: 0,
            ..NotificationQuery::default()
        };
        assert_eq!(store.list(user(1), &zero, now).unwrap().len(), 1);
    }

    #[test]
    fn mark_all_read_skips_expired_rows() {
        let store = InMemoryNotificationStore::new();
        let now = Utc::now();
        let stale = store
            .create(new_row(1, "stale").with_expiry(now - Duration::minutes(1)))
            .unwrap();
        store.create(new_row(1, "fresh")).unwrap();

        assert_eq!(store.mark_all_read(user(1), now).unwrap(), 1);
        assert_eq!(store.unread_count(user(1), now).unwrap(), 0);

        let stale = store.read().unwrap().by_id[&stale.id].clone();
        assert!(!stale.read);
    }

    #[test]
    fn delete_created_before_only_touches_owner() {
        let store = InMemoryNotificationStore::new();
        store.create(new_row(1, "a")).unwrap();
        store.create(new_row(1, "b")).unwrap();
        store.create(new_row(2, "c")).unwrap();

        let past = Utc::now() - Duration::days(1);
        assert_eq!(store.delete_created_before(user(1), past).unwrap(), 0);

        let future = Utc::now() + Duration::seconds(1);
        assert_eq!(store.delete_created_before(user(1), future).unwrap(), 2);
        assert_eq!(store.len(), 1);
    }
}
