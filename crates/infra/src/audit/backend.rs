//! Append-only key-value boundary behind the audit ledger.
//!
//! The ledger owns the key scheme, filtering and statistics; a backend only
//! has to store bytes under unique keys and return them in key order.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use super::key::prefix_upper_bound;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("invalid ledger key: {0}")]
    InvalidKey(String),

    #[error("ledger key already exists: {0}")]
    DuplicateKey(String),

    #[error("ledger record not found: {0}")]
    NotFound(String),

    #[error("ledger record codec error: {0}")]
    Codec(String),

    #[error("ledger storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

/// One stored record as returned by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub key: String,
    pub value: Vec<u8>,
}

/// Immutable, prefix-scannable key-value store.
///
/// Implementations must:
/// - reject `append` for an existing key with `DuplicateKey` (never overwrite)
/// - return `NotFound` from `get` for a missing key
/// - return scan results in ascending key order, at most `limit` of them
/// - return the greatest key under a prefix from `last_key`
///
/// There is no update or delete operation.
pub trait LedgerBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    fn append(&self, key: &str, value: &[u8]) -> Result<(), LedgerError>;

    fn get(&self, key: &str) -> Result<Vec<u8>, LedgerError>;

    fn scan(&self, prefix: &str, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError>;

    fn last_key(&self, prefix: &str) -> Result<Option<String>, LedgerError>;
}

impl<B> LedgerBackend for Arc<B>
where
    B: LedgerBackend + ?Sized,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn append(&self, key: &str, value: &[u8]) -> Result<(), LedgerError> {
        (**self).append(key, value)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, LedgerError> {
        (**self).get(key)
    }

    fn scan(&self, prefix: &str, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        (**self).scan(prefix, limit)
    }

    fn last_key(&self, prefix: &str) -> Result<Option<String>, LedgerError> {
        (**self).last_key(prefix)
    }
}

/// In-memory ledger backend.
///
/// Intended for tests/dev and single-process deployments without compliance
/// retention needs.
#[derive(Debug, Default)]
pub struct InMemoryLedgerBackend {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryLedgerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LedgerBackend for InMemoryLedgerBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn append(&self, key: &str, value: &[u8]) -> Result<(), LedgerError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| LedgerError::storage("ledger lock poisoned"))?;
        if records.contains_key(key) {
            return Err(LedgerError::DuplicateKey(key.to_string()));
        }
        records.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, LedgerError> {
        let records = self
            .records
            .read()
            .map_err(|_| LedgerError::storage("ledger lock poisoned"))?;
        records
            .get(key)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(key.to_string()))
    }

    fn scan(&self, prefix: &str, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let records = self
            .records
            .read()
            .map_err(|_| LedgerError::storage("ledger lock poisoned"))?;
        Ok(records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(limit)
            .map(|(key, value)| LedgerEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    fn last_key(&self, prefix: &str) -> Result<Option<String>, LedgerError> {
        let records = self
            .records
            .read()
            .map_err(|_| LedgerError::storage("ledger lock poisoned"))?;
        let last = match prefix_upper_bound(prefix) {
            Some(upper) => records.range(prefix.to_string()..upper).next_back(),
            None => records.range(prefix.to_string()..).next_back(),
        };
        Ok(last
            .map(|(key, _)| key.clone())
            .filter(|key| key.starts_with(prefix)))
    }
}
