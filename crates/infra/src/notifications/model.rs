use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use custody_core::{NotificationId, UserId};

/// Category of a durable notification row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    TransferUpdate,
    TransferCreated,
    PropertyUpdate,
    ConnectionRequest,
    ConnectionAccepted,
    DocumentReceived,
    General,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::TransferUpdate => "transfer_update",
            NotificationType::TransferCreated => "transfer_created",
            NotificationType::PropertyUpdate => "property_update",
            NotificationType::ConnectionRequest => "connection_request",
            NotificationType::ConnectionAccepted => "connection_accepted",
            NotificationType::DocumentReceived => "document_received",
            NotificationType::General => "general",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "transfer_update" => NotificationType::TransferUpdate,
            "transfer_created" => NotificationType::TransferCreated,
            "property_update" => NotificationType::PropertyUpdate,
            "connection_request" => NotificationType::ConnectionRequest,
            "connection_accepted" => NotificationType::ConnectionAccepted,
            "document_received" => NotificationType::DocumentReceived,
            "general" => NotificationType::General,
            _ => return None,
        })
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "low" => Priority::Low,
            "normal" => Priority::Normal,
            "high" => Priority::High,
            "urgent" => Priority::Urgent,
            _ => return None,
        })
    }
}

/// A persisted, per-recipient notification row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub data: JsonValue,
    pub priority: Priority,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Expired rows are invisible to every read path.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A notification row before the store assigns its id and creation time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: UserId,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub data: JsonValue,
    pub priority: Priority,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewNotification {
    pub fn new(
        user_id: UserId,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            notification_type,
            title: title.into(),
            message: message.into(),
            data: JsonValue::Null,
            priority: Priority::Normal,
            expires_at: None,
        }
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = data;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 1000;

/// Listing parameters for one user's notifications.
///
/// Stores page with [`NotificationQuery::effective_limit`], so a query built
/// literally or deserialized is held to the same bounds as one from `new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationQuery {
    pub limit: u32,
    pub offset: u32,
    pub unread_only: bool,
}

impl Default for NotificationQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
            unread_only: false,
        }
    }
}

impl NotificationQuery {
    pub fn new(limit: Option<u32>, offset: Option<u32>, unread_only: bool) -> Self {
        Self {
            limit: clamp_limit(limit.unwrap_or(DEFAULT_PAGE_LIMIT)),
            offset: offset.unwrap_or(0),
            unread_only,
        }
    }

    pub fn effective_limit(&self) -> u32 {
        clamp_limit(self.limit)
    }

    pub fn unread() -> Self {
        Self {
            unread_only: true,
            ..Self::default()
        }
    }
}

fn clamp_limit(limit: u32) -> u32 {
    limit.clamp(1, MAX_PAGE_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn query_limit_is_clamped() {
        assert_eq!(NotificationQuery::new(None, None, false).limit, 50);
        assert_eq!(NotificationQuery::new(Some(5000), Some(3), true).limit, 1000);
        assert_eq!(NotificationQuery::new(Some(0), None, false).limit, 1);
    }

    #[test]
    fn deserialized_query_is_still_bounded() {
        let query: NotificationQuery =
            serde_json::from_str(r#"{"limit":100000,"offset":0,"unread_only":false}"#).unwrap();
        assert_eq!(query.effective_limit(), MAX_PAGE_LIMIT);

        let zero = NotificationQuery {
            limit: 0,
            ..NotificationQuery::default()
        };
        assert_eq!(zero.effective_limit(), 1);
    }

    #[test]
    fn type_and_priority_strings_match_serde() {
        for t in [
            NotificationType::TransferUpdate,
            NotificationType::TransferCreated,
            NotificationType::PropertyUpdate,
            NotificationType::ConnectionRequest,
            NotificationType::ConnectionAccepted,
            NotificationType::DocumentReceived,
            NotificationType::General,
        ] {
            assert_eq!(serde_json::to_value(t).unwrap(), t.as_str());
            assert_eq!(NotificationType::parse(t.as_str()), Some(t));
        }
        assert_eq!(Priority::parse(Priority::Urgent.as_str()), Some(Priority::Urgent));
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn expiry_is_inclusive_of_now() {
        let now = Utc::now();
        let mut n = Notification {
            id: NotificationId::new(1),
            user_id: UserId::new(1),
            notification_type: NotificationType::General,
            title: String::new(),
            message: String::new(),
            data: JsonValue::Null,
            priority: Priority::Normal,
            read: false,
            read_at: None,
            created_at: now,
            expires_at: None,
        };
        assert!(!n.is_expired(now));
        n.expires_at = Some(now);
        assert!(n.is_expired(now));
        n.expires_at = Some(now + Duration::seconds(1));
        assert!(!n.is_expired(now));
    }
}
