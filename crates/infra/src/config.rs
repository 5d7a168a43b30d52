//! Process configuration read from environment variables.
//!
//! | variable | default |
//! |---|---|
//! | `HUB_QUEUE_CAPACITY` | `256` |
//! | `AUDIT_LEDGER_BACKEND` | `memory` (`memory`, `postgres`, `disabled`) |
//! | `NOTIFICATION_STORE` | `memory` (`memory`, `postgres`) |
//! | `DATABASE_URL` | unset; required for any `postgres` backend |
//! | `AUDIT_SCAN_CAP` | `10000` |
//! | `AUDIT_TRAIL_PAGE` | `1000` |
//! | `NOTIFICATION_TTL_DAYS` | unset (rows never expire) |

use std::str::FromStr;

use thiserror::Error;

use custody_events::DEFAULT_QUEUE_CAPACITY;

use crate::audit::ledger::{DEFAULT_SCAN_CAP, DEFAULT_TRAIL_PAGE};

pub const HUB_QUEUE_CAPACITY: &str = "HUB_QUEUE_CAPACITY";
pub const AUDIT_LEDGER_BACKEND: &str = "AUDIT_LEDGER_BACKEND";
pub const NOTIFICATION_STORE: &str = "NOTIFICATION_STORE";
pub const DATABASE_URL: &str = "DATABASE_URL";
pub const AUDIT_SCAN_CAP: &str = "AUDIT_SCAN_CAP";
pub const AUDIT_TRAIL_PAGE: &str = "AUDIT_TRAIL_PAGE";
pub const NOTIFICATION_TTL_DAYS: &str = "NOTIFICATION_TTL_DAYS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum LedgerBackendKind {
    #[default]
    Memory,
    Postgres,
    Disabled,
}

impl FromStr for LedgerBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            "disabled" | "none" => Ok(Self::Disabled),
            _ => Err("expected memory, postgres or disabled".to_string()),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum NotificationStoreKind {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for NotificationStoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            _ => Err("expected memory or postgres".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustodyConfig {
    pub hub_queue_capacity: usize,
    pub ledger_backend: LedgerBackendKind,
    pub notification_store: NotificationStoreKind,
    pub database_url: Option<String>,
    pub audit_scan_cap: usize,
    pub audit_trail_page: usize,
    pub notification_ttl_days: Option<u32>,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            hub_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            ledger_backend: LedgerBackendKind::default(),
            notification_store: NotificationStoreKind::default(),
            database_url: None,
            audit_scan_cap: DEFAULT_SCAN_CAP,
            audit_trail_page: DEFAULT_TRAIL_PAGE,
            notification_ttl_days: None,
        }
    }
}

impl CustodyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset or blank variables take
    /// their defaults; malformed ones are rejected.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let config = Self {
            hub_queue_capacity: parse_positive(HUB_QUEUE_CAPACITY, get(HUB_QUEUE_CAPACITY), defaults.hub_queue_capacity)?,
            ledger_backend: parse_or(AUDIT_LEDGER_BACKEND, get(AUDIT_LEDGER_BACKEND), defaults.ledger_backend)?,
            notification_store: parse_or(NOTIFICATION_STORE, get(NOTIFICATION_STORE), defaults.notification_store)?,
            database_url: get(DATABASE_URL),
            audit_scan_cap: parse_positive(AUDIT_SCAN_CAP, get(AUDIT_SCAN_CAP), defaults.audit_scan_cap)?,
            audit_trail_page: parse_positive(AUDIT_TRAIL_PAGE, get(AUDIT_TRAIL_PAGE), defaults.audit_trail_page)?,
            notification_ttl_days: get(NOTIFICATION_TTL_DAYS)
                .map(|raw| parse_value(NOTIFICATION_TTL_DAYS, &raw))
                .transpose()?,
        };

        if config.needs_database() && config.database_url.is_none() {
            return Err(ConfigError::invalid(
                DATABASE_URL,
                "",
                "must be set when a postgres backend is selected",
            ));
        }
        if config.ledger_backend == LedgerBackendKind::Disabled {
            tracing::warn!(variable = AUDIT_LEDGER_BACKEND, "audit ledger disabled; events will not be stored");
        }
        Ok(config)
    }

    pub fn needs_database(&self) -> bool {
        self.ledger_backend == LedgerBackendKind::Postgres
            || self.notification_store == NotificationStoreKind::Postgres
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, raw, e.to_string()))
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    raw.map_or(Ok(default), |raw| parse_value(key, &raw))
}

fn parse_positive(key: &'static str, raw: Option<String>, default: usize) -> Result<usize, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match parse_value::<usize>(key, &raw)? {
        0 => Err(ConfigError::invalid(key, &raw, "must be at least 1")),
        n => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<CustodyConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CustodyConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(from_pairs(&[]).unwrap(), CustodyConfig::default());
    }

    #[test]
    fn values_are_parsed() {
        let config = from_pairs(&[
            (HUB_QUEUE_CAPACITY, "16"),
            (AUDIT_LEDGER_BACKEND, "Postgres"),
            (DATABASE_URL, "postgres://localhost/custody"),
            (AUDIT_SCAN_CAP, "500"),
            (NOTIFICATION_TTL_DAYS, " 30 "),
        ])
        .unwrap();

        assert_eq!(config.hub_queue_capacity, 16);
        assert_eq!(config.ledger_backend, LedgerBackendKind::Postgres);
        assert_eq!(config.notification_store, NotificationStoreKind::Memory);
        assert_eq!(config.audit_scan_cap, 500);
        assert_eq!(config.audit_trail_page, DEFAULT_TRAIL_PAGE);
        assert_eq!(config.notification_ttl_days, Some(30));
        assert!(config.needs_database());
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = from_pairs(&[(HUB_QUEUE_CAPACITY, "  ")]).unwrap();
        assert_eq!(config.hub_queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = from_pairs(&[(HUB_QUEUE_CAPACITY, "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: HUB_QUEUE_CAPACITY, .. }));

        assert!(from_pairs(&[(AUDIT_SCAN_CAP, "0")]).is_err());
        assert!(from_pairs(&[(NOTIFICATION_STORE, "redis")]).is_err());
    }

    #[test]
    fn postgres_requires_database_url() {
        let err = from_pairs(&[(NOTIFICATION_STORE, "postgres")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: DATABASE_URL, .. }));
    }

    #[test]
    fn ledger_can_be_disabled() {
        let config = from_pairs(&[(AUDIT_LEDGER_BACKEND, "disabled")]).unwrap();
        assert_eq!(config.ledger_backend, LedgerBackendKind::Disabled);
        assert!(!config.needs_database());
    }
}
