//! Durable per-recipient notifications and the service that emits them.

pub mod in_memory;
pub mod model;
pub mod postgres;
pub mod service;
pub mod store;

pub use in_memory::InMemoryNotificationStore;
pub use model::{
    NewNotification, Notification, NotificationQuery, NotificationType, Priority,
    DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
pub use postgres::PostgresNotificationStore;
pub use service::{
    ConnectionNotice, DocumentNotice, EmitOutcome, GeneralNotice, NotificationConfig,
    NotificationError, NotificationService, PropertyNotice, TransferNotice,
};
pub use store::{NotificationStore, NotificationStoreError};
