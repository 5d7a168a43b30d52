//! Identifiers and error primitives shared by every layer.
//!
//! This crate contains no I/O and no threading.

pub mod error;
pub mod id;

pub use error::{CoreError, CoreResult};
pub use id::{AuditEventId, ConnectionId, NotificationId, UserId};
