//! Kind-specific payload shapes carried in the `data` field of the live
//! envelope. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use custody_core::UserId;

/// A hand-receipt transfer between two users (`transfer:created`, `transfer:update`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferData {
    pub transfer_id: i64,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub status: String,
    pub serial_number: String,
    pub item_name: String,
}

/// A property record change (`property:update`).
///
/// `owner_id` is `None` for unassigned property; such events reach nobody live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyData {
    pub property_id: i64,
    pub owner_id: Option<UserId>,
    pub serial_number: String,
    pub status: String,
    pub action: String,
}

/// A connection request or acceptance between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionData {
    pub connection_id: i64,
    pub from_user_id: UserId,
    pub from_user_name: String,
    pub target_user_id: UserId,
    pub status: String,
}

/// A document delivered to a user's inbox (`document:received`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentData {
    pub document_id: i64,
    pub recipient_id: UserId,
    pub sender_id: UserId,
    pub document_type: String,
    pub title: String,
}

/// Free-form message for one user (`notification:general`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralData {
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

/// Typed payload of an [`EventEnvelope`](crate::EventEnvelope).
///
/// Serialized untagged: the discriminator lives in the envelope's `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Transfer(TransferData),
    Property(PropertyData),
    Connection(ConnectionData),
    Document(DocumentData),
    General(GeneralData),
}

impl From<TransferData> for EventPayload {
    fn from(value: TransferData) -> Self {
        Self::Transfer(value)
    }
}

impl From<PropertyData> for EventPayload {
    fn from(value: PropertyData) -> Self {
        Self::Property(value)
    }
}

impl From<ConnectionData> for EventPayload {
    fn from(value: ConnectionData) -> Self {
        Self::Connection(value)
    }
}

impl From<DocumentData> for EventPayload {
    fn from(value: DocumentData) -> Self {
        Self::Document(value)
    }
}

impl From<GeneralData> for EventPayload {
    fn from(value: GeneralData) -> Self {
        Self::General(value)
    }
}
