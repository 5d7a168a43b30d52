use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use custody_core::{AuditEventId, UserId};

/// Opaque key-value snapshot of an entity (before/after values, metadata).
pub type JsonMap = Map<String, JsonValue>;

pub const ENTITY_USER: &str = "user";
pub const ENTITY_EQUIPMENT: &str = "equipment";
pub const ENTITY_HAND_RECEIPT: &str = "hand_receipt";

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    View,
    Login,
    Logout,
    Transfer,
    Assign,
    Return,
    /// A new record amending an earlier one; see [`AuditEvent::corrects`].
    Correction,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::View => "view",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::Transfer => "transfer",
            AuditAction::Assign => "assign",
            AuditAction::Return => "return",
            AuditAction::Correction => "correction",
        }
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who performed the action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub name: String,
}

impl Actor {
    pub fn new(user_id: UserId, name: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
        }
    }
}

/// Request metadata captured at the call site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub session_id: String,
}

/// Before/after values plus free-form context of one lifecycle action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    pub old_values: Option<JsonMap>,
    pub new_values: Option<JsonMap>,
    pub request: RequestMeta,
    pub metadata: JsonMap,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn old_values(mut self, values: JsonMap) -> Self {
        self.old_values = Some(values);
        self
    }

    pub fn new_values(mut self, values: JsonMap) -> Self {
        self.new_values = Some(values);
        self
    }

    pub fn request(mut self, request: RequestMeta) -> Self {
        self.request = request;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// An audit record as stored. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: AuditEventId,
    pub entity_type: String,
    pub entity_id: String,
    pub action: AuditAction,
    #[serde(rename = "user_id")]
    pub actor_user_id: UserId,
    #[serde(rename = "username")]
    pub actor_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_values: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_values: Option<JsonMap>,
    #[serde(default)]
    pub request: RequestMeta,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: JsonMap,
    /// Set only on `correction` records: the record being amended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrects: Option<AuditEventId>,
    /// Hex SHA-256 over the record with this field empty.
    #[serde(default)]
    pub digest: String,
}

/// Input to `AuditLedger::log_event`. `id` and `timestamp` are generated when
/// left unset.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEvent {
    pub id: Option<AuditEventId>,
    pub entity_type: String,
    pub entity_id: String,
    pub action: AuditAction,
    pub actor: Actor,
    pub timestamp: Option<DateTime<Utc>>,
    pub changes: Changes,
    pub(crate) corrects: Option<AuditEventId>,
}

impl NewAuditEvent {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: AuditAction,
        actor: Actor,
    ) -> Self {
        Self {
            id: None,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action,
            actor,
            timestamp: None,
            changes: Changes::default(),
            corrects: None,
        }
    }

    pub fn with_id(mut self, id: AuditEventId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_changes(mut self, changes: Changes) -> Self {
        self.changes = changes;
        self
    }
}

/// Ledger search criteria. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<AuditAction>,
    pub actor: Option<UserId>,
    /// Only correction records amending this event.
    pub corrects: Option<AuditEventId>,
    /// Inclusive lower bound.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub end: Option<DateTime<Utc>>,
    /// Defaults to 100, capped at 1000.
    pub limit: Option<u32>,
    pub offset: u32,
}

pub const DEFAULT_SEARCH_LIMIT: u32 = 100;
pub const MAX_SEARCH_LIMIT: u32 = 1000;

impl AuditFilter {
    pub fn for_entity(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            entity_id: Some(entity_id.into()),
            ..Self::default()
        }
    }

    pub fn for_type(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            ..Self::default()
        }
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn correcting(mut self, original: AuditEventId) -> Self {
        self.corrects = Some(original);
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT) as usize
    }

    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.entity_type.as_ref().is_none_or(|t| *t == event.entity_type)
            && self.entity_id.as_ref().is_none_or(|id| *id == event.entity_id)
            && self.action.is_none_or(|a| a == event.action)
            && self.actor.is_none_or(|u| u == event.actor_user_id)
            && self.corrects.is_none_or(|id| event.corrects == Some(id))
            && in_window(event.timestamp, self.start, self.end)
    }
}

pub(crate) fn in_window(
    at: DateTime<Utc>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> bool {
    start.is_none_or(|s| at >= s) && end.is_none_or(|e| at <= e)
}

/// Aggregate counts over a ledger window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditStatistics {
    pub total_events: u64,
    pub events_by_action: BTreeMap<AuditAction, u64>,
    pub events_by_actor: BTreeMap<UserId, u64>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// The scan stopped at the configured cap; counts cover a prefix of the ledger.
    pub truncated: bool,
}

/// Why one record failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// Re-reading the key failed.
    Unreadable(String),
    /// The re-read bytes differ from the scanned bytes.
    Changed,
    /// The stored bytes are not an audit record.
    Undecodable(String),
    /// The record's own fields do not produce its key.
    KeyMismatch,
    /// The record content does not match its digest.
    DigestMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityFailure {
    pub key: String,
    pub issue: IntegrityIssue,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub checked: usize,
    pub failures: Vec<IntegrityFailure>,
}

impl IntegrityReport {
    pub fn is_verified(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event_at(action: AuditAction, actor: i64, at: DateTime<Utc>) -> AuditEvent {
        AuditEvent {
            id: AuditEventId::new(),
            entity_type: "property".to_string(),
            entity_id: "42".to_string(),
            action,
            actor_user_id: UserId::new(actor),
            actor_name: "SSG Cole".to_string(),
            timestamp: at,
            old_values: None,
            new_values: None,
            request: RequestMeta::default(),
            metadata: JsonMap::new(),
            corrects: None,
            digest: String::new(),
        }
    }

    #[test]
    fn stored_shape_uses_snake_case_and_omits_empty_fields() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let value = serde_json::to_value(event_at(AuditAction::Return, 7, at)).unwrap();
        assert_eq!(value["action"], "return");
        assert_eq!(value["user_id"], 7);
        assert_eq!(value["username"], "SSG Cole");
        assert!(value.get("old_values").is_none());
        assert!(value.get("metadata").is_none());
        assert!(value.get("corrects").is_none());
    }

    #[test]
    fn filter_window_is_inclusive() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let filter = AuditFilter::for_type("property").between(start, end);

        assert!(filter.matches(&event_at(AuditAction::Update, 1, start)));
        assert!(filter.matches(&event_at(AuditAction::Update, 1, end)));
        assert!(!filter.matches(&event_at(
            AuditAction::Update,
            1,
            end + chrono::Duration::nanoseconds(1)
        )));
    }

    #[test]
    fn filter_combines_predicates() {
        let at = Utc::now();
        let filter = AuditFilter {
            action: Some(AuditAction::Transfer),
            actor: Some(UserId::new(3)),
            ..AuditFilter::default()
        };
        assert!(filter.matches(&event_at(AuditAction::Transfer, 3, at)));
        assert!(!filter.matches(&event_at(AuditAction::Transfer, 4, at)));
        assert!(!filter.matches(&event_at(AuditAction::Assign, 3, at)));
    }

    #[test]
    fn filter_on_corrected_event() {
        let original = AuditEventId::new();
        let mut correction = event_at(AuditAction::Correction, 2, Utc::now());
        correction.corrects = Some(original);

        let filter = AuditFilter::default().correcting(original);
        assert!(filter.matches(&correction));
        assert!(!filter.matches(&event_at(AuditAction::Correction, 2, Utc::now())));
        assert!(!AuditFilter::default().correcting(AuditEventId::new()).matches(&correction));
    }

    #[test]
    fn search_limit_defaults_and_caps() {
        assert_eq!(AuditFilter::default().effective_limit(), 100);
        let big = AuditFilter {
            limit: Some(50_000),
            ..AuditFilter::default()
        };
        assert_eq!(big.effective_limit(), 1000);
    }
}
