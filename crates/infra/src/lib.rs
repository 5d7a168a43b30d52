//! Infrastructure layer: durable notifications, audit ledger, config, wiring.

pub mod audit;
pub mod config;
pub mod notifications;
pub mod services;

mod pg;


pub use config::{ConfigError, CustodyConfig, LedgerBackendKind, NotificationStoreKind};
pub use services::{CoreServices, CustodyNotifications, DynNotificationStore};
