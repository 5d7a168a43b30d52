//! Immutable audit trail for accountable property.
//!
//! - `model`: records, filters, statistics and verification results
//! - `key`: the `audit:{type}:{id}:{nanos}` key scheme
//! - `backend`: the append-only storage boundary and its in-memory impl
//! - `postgres`: Postgres storage with triggers rejecting UPDATE/DELETE
//! - `ledger`: `AuditLedger`, the write/read/verify API

pub mod backend;
pub mod key;
pub mod ledger;
pub mod model;
pub mod postgres;

pub use backend::{InMemoryLedgerBackend, LedgerBackend, LedgerEntry, LedgerError};
pub use ledger::{AuditLedger, LedgerConfig, compute_digest};
pub use model::{
    Actor, AuditAction, AuditEvent, AuditFilter, AuditStatistics, Changes, ENTITY_EQUIPMENT,
    ENTITY_HAND_RECEIPT, ENTITY_USER, IntegrityFailure, IntegrityIssue, IntegrityReport, JsonMap,
    NewAuditEvent, RequestMeta,
};
pub use postgres::PostgresLedgerBackend;
