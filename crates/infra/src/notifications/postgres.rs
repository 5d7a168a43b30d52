//! Postgres-backed notification store.
//!
//! One row per recipient in the `notifications` table. Every mutating query
//! carries `user_id` in its `WHERE` clause, so an id owned by somebody else
//! behaves exactly like an unknown id (`NotFound`).
//!
//! ## Thread Safety
//!
//! `PostgresNotificationStore` is `Send + Sync` and can be shared across
//! threads; sqlx's pool handles connection management.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;

use custody_core::{NotificationId, UserId};

use super::model::{NewNotification, Notification, NotificationQuery, NotificationType, Priority};
use super::store::{NotificationStore, NotificationStoreError};
use crate::pg::{self, SqlFailure};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS notifications (
    id          BIGSERIAL PRIMARY KEY,
    user_id     BIGINT NOT NULL,
    type        TEXT NOT NULL,
    title       TEXT NOT NULL,
    message     TEXT NOT NULL,
    data        JSONB NOT NULL DEFAULT 'null'::jsonb,
    priority    TEXT NOT NULL DEFAULT 'normal',
    read        BOOLEAN NOT NULL DEFAULT FALSE,
    read_at     TIMESTAMPTZ,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    expires_at  TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS idx_notifications_user_created
    ON notifications (user_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_notifications_user_unread
    ON notifications (user_id) WHERE read = FALSE;
"#;

const COLUMNS: &str =
    "id, user_id, type, title, message, data, priority, read, read_at, created_at, expires_at";

#[derive(Debug, Clone)]
pub struct PostgresNotificationStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresNotificationStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    /// Create the table and indexes if missing.
    pub async fn ensure_schema(&self) -> Result<(), NotificationStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self, notification), fields(user_id = %notification.user_id), err)]
    pub async fn create_async(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, NotificationStoreError> {
        let sql = format!(
            "INSERT INTO notifications (user_id, type, title, message, data, priority, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(notification.user_id.get())
            .bind(notification.notification_type.as_str())
            .bind(&notification.title)
            .bind(&notification.message)
            .bind(&notification.data)
            .bind(notification.priority.as_str())
            .bind(notification.expires_at)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create", e))?;

        decode(&row)
    }

    #[instrument(skip(self, query), fields(user_id = %user_id), err)]
    pub async fn list_async(
        &self,
        user_id: UserId,
        query: &NotificationQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, NotificationStoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE user_id = $1 \
               AND (expires_at IS NULL OR expires_at > $2) \
               AND ($3 = FALSE OR read = FALSE) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $4 OFFSET $5"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.get())
            .bind(now)
            .bind(query.unread_only)
            .bind(i64::from(query.effective_limit()))
            .bind(i64::from(query.offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list", e))?;

        rows.iter().map(decode).collect()
    }

    pub async fn unread_count_async(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, NotificationStoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications \
             WHERE user_id = $1 AND read = FALSE \
               AND (expires_at IS NULL OR expires_at > $2)",
        )
        .bind(user_id.get())
        .bind(now)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("unread_count", e))?;

        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self), fields(user_id = %user_id, notification_id = %id), err)]
    pub async fn mark_read_async(
        &self,
        user_id: UserId,
        id: NotificationId,
        now: DateTime<Utc>,
    ) -> Result<Notification, NotificationStoreError> {
        // COALESCE keeps the first read_at on repeated calls.
        let sql = format!(
            "UPDATE notifications SET read = TRUE, read_at = COALESCE(read_at, $3) \
             WHERE id = $1 AND user_id = $2 RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.get())
            .bind(user_id.get())
            .bind(now)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_read", e))?
            .ok_or(NotificationStoreError::NotFound(id))?;

        decode(&row)
    }

    pub async fn mark_all_read_async(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, NotificationStoreError> {
        let result = sqlx::query(
            "UPDATE notifications SET read = TRUE, read_at = $2 \
             WHERE user_id = $1 AND read = FALSE \
               AND (expires_at IS NULL OR expires_at > $2)",
        )
        .bind(user_id.get())
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_all_read", e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(user_id = %user_id, notification_id = %id), err)]
    pub async fn delete_async(
        &self,
        user_id: UserId,
        id: NotificationId,
    ) -> Result<(), NotificationStoreError> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
            .bind(id.get())
            .bind(user_id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;

        if result.rows_affected() == 0 {
            return Err(NotificationStoreError::NotFound(id));
        }
        Ok(())
    }

    pub async fn delete_created_before_async(
        &self,
        user_id: UserId,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, NotificationStoreError> {
        let result = sqlx::query("DELETE FROM notifications WHERE user_id = $1 AND created_at < $2")
            .bind(user_id.get())
            .bind(cutoff)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_created_before", e))?;

        Ok(result.rows_affected())
    }

    pub async fn purge_expired_async(&self, now: DateTime<Utc>) -> Result<u64, NotificationStoreError> {
        let result = sqlx::query("DELETE FROM notifications WHERE expires_at IS NOT NULL AND expires_at <= $1")
            .bind(now)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_expired", e))?;

        Ok(result.rows_affected())
    }

    fn run<T>(
        &self,
        future: impl std::future::Future<Output = Result<T, NotificationStoreError>>,
    ) -> Result<T, NotificationStoreError> {
        pg::block_on(&self.runtime, future, NotificationStoreError::storage)
    }
}

impl NotificationStore for PostgresNotificationStore {
    fn create(&self, notification: NewNotification) -> Result<Notification, NotificationStoreError> {
        self.run(self.create_async(notification))
    }

    fn list(
        &self,
        user_id: UserId,
        query: &NotificationQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, NotificationStoreError> {
        self.run(self.list_async(user_id, query, now))
    }

    fn unread_count(&self, user_id: UserId, now: DateTime<Utc>) -> Result<u64, NotificationStoreError> {
        self.run(self.unread_count_async(user_id, now))
    }

    fn mark_read(
        &self,
        user_id: UserId,
        id: NotificationId,
        now: DateTime<Utc>,
    ) -> Result<Notification, NotificationStoreError> {
        self.run(self.mark_read_async(user_id, id, now))
    }

    fn mark_all_read(&self, user_id: UserId, now: DateTime<Utc>) -> Result<u64, NotificationStoreError> {
        self.run(self.mark_all_read_async(user_id, now))
    }

    fn delete(&self, user_id: UserId, id: NotificationId) -> Result<(), NotificationStoreError> {
        self.run(self.delete_async(user_id, id))
    }

    fn delete_created_before(
        &self,
        user_id: UserId,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, NotificationStoreError> {
        self.run(self.delete_created_before_async(user_id, cutoff))
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, NotificationStoreError> {
        self.run(self.purge_expired_async(now))
    }
}

/// Raw `notifications` row as read from the database.
#[derive(Debug, Clone)]
struct NotificationRow {
    id: i64,
    user_id: i64,
    notification_type: String,
    title: String,
    message: String,
    data: JsonValue,
    priority: String,
    read: bool,
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl FromRow<'_, sqlx::postgres::PgRow> for NotificationRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            notification_type: row.try_get("type")?,
            title: row.try_get("title")?,
            message: row.try_get("message")?,
            data: row.try_get("data")?,
            priority: row.try_get("priority")?,
            read: row.try_get("read")?,
            read_at: row.try_get("read_at")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

impl TryFrom<NotificationRow> for Notification {
    type Error = NotificationStoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let notification_type = NotificationType::parse(&row.notification_type).ok_or_else(|| {
            NotificationStoreError::storage(format!(
                "unknown notification type {:?} in row {}",
                row.notification_type, row.id
            ))
        })?;
        let priority = Priority::parse(&row.priority).ok_or_else(|| {
            NotificationStoreError::storage(format!(
                "unknown priority {:?} in row {}",
                row.priority, row.id
            ))
        })?;

        Ok(Notification {
            id: NotificationId::new(row.id),
            user_id: UserId::new(row.user_id),
            notification_type,
            title: row.title,
            message: row.message,
            data: row.data,
            priority,
            read: row.read,
            read_at: row.read_at,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

fn decode(row: &sqlx::postgres::PgRow) -> Result<Notification, NotificationStoreError> {
    let raw = NotificationRow::from_row(row).map_err(|e| {
        NotificationStoreError::storage(format!("failed to deserialize notification row: {}", e))
    })?;
    raw.try_into()
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> NotificationStoreError {
    match pg::classify_sqlx_error(operation, err) {
        SqlFailure::UniqueViolation(msg) | SqlFailure::Other(msg) => NotificationStoreError::Storage(msg),
    }
}
