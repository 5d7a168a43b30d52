//! Canonical description of one broadcastable occurrence and its JSON wire form.
//!
//! The wire object delivered to connected clients is:
//!
//! ```text
//! { "type": "<kind>", "data": { .. }, "timestamp": "<RFC 3339>", "userId": 7 }
//! ```
//!
//! `userId` is present only when the envelope names an explicit target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use custody_core::UserId;

use crate::payload::{
    ConnectionData, DocumentData, EventPayload, GeneralData, PropertyData, TransferData,
};

/// Closed set of event kinds. The serialized strings are fixed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "transfer:update")]
    TransferUpdate,
    #[serde(rename = "transfer:created")]
    TransferCreated,
    #[serde(rename = "property:update")]
    PropertyUpdate,
    #[serde(rename = "connection:request")]
    ConnectionRequest,
    #[serde(rename = "connection:accepted")]
    ConnectionAccepted,
    #[serde(rename = "document:received")]
    DocumentReceived,
    #[serde(rename = "notification:general")]
    General,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::TransferUpdate,
        EventKind::TransferCreated,
        EventKind::PropertyUpdate,
        EventKind::ConnectionRequest,
        EventKind::ConnectionAccepted,
        EventKind::DocumentReceived,
        EventKind::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TransferUpdate => "transfer:update",
            EventKind::TransferCreated => "transfer:created",
            EventKind::PropertyUpdate => "property:update",
            EventKind::ConnectionRequest => "connection:request",
            EventKind::ConnectionAccepted => "connection:accepted",
            EventKind::DocumentReceived => "document:received",
            EventKind::General => "notification:general",
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload does not match event kind {kind}")]
    PayloadMismatch { kind: EventKind },
}

/// Immutable event envelope, created per emission and never persisted as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    kind: EventKind,
    payload: EventPayload,
    timestamp: DateTime<Utc>,
    target_user_id: Option<UserId>,
}

impl EventEnvelope {
    /// Build an envelope stamped with the current time.
    pub fn new(kind: EventKind, payload: impl Into<EventPayload>) -> Self {
        Self::at(kind, payload, Utc::now())
    }

    pub fn at(kind: EventKind, payload: impl Into<EventPayload>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            timestamp,
            target_user_id: None,
        }
    }

    /// Address the envelope to exactly one user, bypassing kind-based routing.
    pub fn with_target(mut self, user_id: UserId) -> Self {
        self.target_user_id = Some(user_id);
        self
    }

    pub fn transfer_created(data: TransferData) -> Self {
        Self::new(EventKind::TransferCreated, data)
    }

    pub fn transfer_update(data: TransferData) -> Self {
        Self::new(EventKind::TransferUpdate, data)
    }

    pub fn property_update(data: PropertyData) -> Self {
        Self::new(EventKind::PropertyUpdate, data)
    }

    pub fn connection_request(data: ConnectionData) -> Self {
        Self::new(EventKind::ConnectionRequest, data)
    }

    pub fn connection_accepted(data: ConnectionData) -> Self {
        Self::new(EventKind::ConnectionAccepted, data)
    }

    pub fn document_received(data: DocumentData) -> Self {
        Self::new(EventKind::DocumentReceived, data)
    }

    pub fn general(user_id: UserId, data: GeneralData) -> Self {
        Self::new(EventKind::General, data).with_target(user_id)
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn target_user_id(&self) -> Option<UserId> {
        self.target_user_id
    }

    /// Serialize to the client wire object.
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        let wire = WireRef {
            kind: self.kind,
            data: &self.payload,
            timestamp: self.timestamp,
            user_id: self.target_user_id,
        };
        Ok(serde_json::to_string(&wire)?)
    }

    /// Parse a wire object, decoding `data` according to `type`.
    pub fn from_json(input: &str) -> Result<Self, EnvelopeError> {
        let wire: WireOwned = serde_json::from_str(input)?;
        let payload = decode_payload(wire.kind, wire.data)?;
        Ok(Self {
            kind: wire.kind,
            payload,
            timestamp: wire.timestamp,
            target_user_id: wire.user_id,
        })
    }
}

#[derive(Serialize)]
struct WireRef<'a> {
    #[serde(rename = "type")]
    kind: EventKind,
    data: &'a EventPayload,
    timestamp: DateTime<Utc>,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    user_id: Option<UserId>,
}

#[derive(Deserialize)]
struct WireOwned {
    #[serde(rename = "type")]
    kind: EventKind,
    data: JsonValue,
    timestamp: DateTime<Utc>,
    #[serde(rename = "userId", default)]
    user_id: Option<UserId>,
}

fn decode_payload(kind: EventKind, data: JsonValue) -> Result<EventPayload, EnvelopeError> {
    let mismatch = |_| EnvelopeError::PayloadMismatch { kind };
    let payload = match kind {
        EventKind::TransferCreated | EventKind::TransferUpdate => {
            EventPayload::Transfer(serde_json::from_value(data).map_err(mismatch)?)
        }
        EventKind::PropertyUpdate => {
            EventPayload::Property(serde_json::from_value(data).map_err(mismatch)?)
        }
        EventKind::ConnectionRequest | EventKind::ConnectionAccepted => {
            EventPayload::Connection(serde_json::from_value(data).map_err(mismatch)?)
        }
        EventKind::DocumentReceived => {
            EventPayload::Document(serde_json::from_value(data).map_err(mismatch)?)
        }
        EventKind::General => EventPayload::General(serde_json::from_value(data).map_err(mismatch)?),
    };
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn transfer() -> TransferData {
        TransferData {
            transfer_id: 9,
            from_user_id: UserId::new(1),
            to_user_id: UserId::new(2),
            status: "pending".to_string(),
            serial_number: "SN-100".to_string(),
            item_name: "M4 Carbine".to_string(),
        }
    }

    #[test]
    fn kind_strings_are_fixed() {
        let strings: Vec<String> = EventKind::ALL
            .iter()
            .map(|k| serde_json::to_value(k).unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            strings,
            vec![
                "transfer:update",
                "transfer:created",
                "property:update",
                "connection:request",
                "connection:accepted",
                "document:received",
                "notification:general",
            ]
        );
        for kind in EventKind::ALL {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
        }
    }

    #[test]
    fn wire_object_has_expected_shape() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let env = EventEnvelope::at(EventKind::TransferCreated, transfer(), ts);

        let value: JsonValue = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "transfer:created");
        assert_eq!(value["timestamp"], "2024-05-01T12:30:00Z");
        assert_eq!(value["data"]["transferId"], 9);
        assert_eq!(value["data"]["fromUserId"], 1);
        assert_eq!(value["data"]["itemName"], "M4 Carbine");
        assert!(value.get("userId").is_none());
    }

    #[test]
    fn general_envelope_carries_user_id() {
        let env = EventEnvelope::general(
            UserId::new(5),
            GeneralData {
                title: "Heads up".to_string(),
                message: "Inventory due".to_string(),
                data: None,
            },
        );
        let value: JsonValue = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["userId"], 5);
        assert_eq!(value["data"]["title"], "Heads up");

        let parsed = EventEnvelope::from_json(&env.to_json().unwrap()).unwrap();
        assert_eq!(parsed.target_user_id(), Some(UserId::new(5)));
        assert_eq!(parsed.kind(), EventKind::General);
    }

    #[test]
    fn from_json_rejects_data_not_matching_type() {
        let input = json!({
            "type": "document:received",
            "data": { "transferId": 1 },
            "timestamp": "2024-05-01T12:30:00Z"
        })
        .to_string();
        let err = EventEnvelope::from_json(&input).unwrap_err();
        assert!(matches!(
            err,
            EnvelopeError::PayloadMismatch { kind: EventKind::DocumentReceived }
        ));
    }

    #[test]
    fn from_json_rejects_unknown_type() {
        let input = json!({
            "type": "transfer:deleted",
            "data": {},
            "timestamp": "2024-05-01T12:30:00Z"
        })
        .to_string();
        assert!(matches!(
            EventEnvelope::from_json(&input),
            Err(EnvelopeError::Json(_))
        ));
    }
}
