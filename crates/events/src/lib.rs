//! Live event distribution: envelopes, routing and the client registry.

pub mod connection;
pub mod delivery;
pub mod envelope;
pub mod hub;
pub mod payload;
pub mod routing;

pub use connection::{ClientConnection, ClientMessage, ClientReceiver, ConnectionHandle};
pub use delivery::{DeliveryReport, LiveDelivery};
pub use envelope::{EnvelopeError, EventEnvelope, EventKind};
pub use hub::{DEFAULT_QUEUE_CAPACITY, Hub, HubConfig, HubError};
pub use payload::{
    ConnectionData, DocumentData, EventPayload, GeneralData, PropertyData, TransferData,
};
pub use routing::{KindRoutingPolicy, RoutingPolicy};
