//! Append-only audit ledger.
//!
//! ## Record lifecycle
//!
//! ```text
//! NewAuditEvent
//!   ↓  id / timestamp defaulted, digest sealed
//! AuditEvent  →  key audit:{type}:{id}:{nanos}  →  LedgerBackend::append
//! ```
//!
//! There is no update or delete. A mistake is amended by appending a
//! `correction` record that points at the original id.
//!
//! ## Bounded reads
//!
//! Every read is a prefix scan with a fixed cap: `trail_page` for one
//! entity's trail, `scan_cap` for search, id lookup, verification and
//! statistics. The caps stand in for timeouts on large ledgers.
//!
//! ## Disabled mode
//!
//! Without a backend the ledger accepts writes without storing them and
//! answers reads with empty results, so callers never branch on whether
//! compliance logging is configured.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use custody_core::{AuditEventId, UserId};

use super::backend::{LedgerBackend, LedgerEntry, LedgerError};
use super::key::{
    ROOT_PREFIX, entity_prefix, key_nanos, record_key, second_prefix, timestamp_nanos, type_prefix,
};
use super::model::{
    Actor, AuditAction, AuditEvent, AuditFilter, AuditStatistics, Changes, ENTITY_EQUIPMENT,
    ENTITY_HAND_RECEIPT, ENTITY_USER, IntegrityFailure, IntegrityIssue, IntegrityReport,
    MAX_SEARCH_LIMIT, NewAuditEvent, in_window,
};

pub const DEFAULT_SCAN_CAP: usize = 10_000;
pub const DEFAULT_TRAIL_PAGE: usize = 1_000;

/// How many lost races `log_event` tolerates before giving up. Each retry
/// jumps past every key already taken, so only a concurrent append between
/// the lookup and the retry costs another attempt.
const MAX_KEY_ATTEMPTS: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub scan_cap: usize,
    pub trail_page: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            scan_cap: DEFAULT_SCAN_CAP,
            trail_page: DEFAULT_TRAIL_PAGE,
        }
    }
}

#[derive(Clone)]
pub struct AuditLedger {
    backend: Option<Arc<dyn LedgerBackend>>,
    config: LedgerConfig,
}

impl core::fmt::Debug for AuditLedger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuditLedger")
            .field("backend", &self.backend_name())
            .field("config", &self.config)
            .finish()
    }
}

impl AuditLedger {
    pub fn new(backend: Arc<dyn LedgerBackend>) -> Self {
        Self::with_config(backend, LedgerConfig::default())
    }

    pub fn with_config(backend: Arc<dyn LedgerBackend>, config: LedgerConfig) -> Self {
        Self {
            backend: Some(backend),
            config,
        }
    }

    /// A ledger with no backend: every operation is a successful no-op.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            config: LedgerConfig::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.as_ref().map_or("disabled", |b| b.name())
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Append one record. Returns the record exactly as stored.
    ///
    /// When another record of the same entity already holds the key for
    /// this timestamp, the timestamp moves to one nanosecond past the
    /// entity's latest key within that second, so concurrent writers never
    /// overwrite each other and keep their order.
    pub fn log_event(&self, event: NewAuditEvent) -> Result<AuditEvent, LedgerError> {
        let mut timestamp = event.timestamp.unwrap_or_else(Utc::now);
        let mut record = AuditEvent {
            id: event.id.unwrap_or_default(),
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            action: event.action,
            actor_user_id: event.actor.user_id,
            actor_name: event.actor.name,
            timestamp,
            old_values: event.changes.old_values,
            new_values: event.changes.new_values,
            request: event.changes.request,
            metadata: event.changes.metadata,
            corrects: event.corrects,
            digest: String::new(),
        };

        let Some(backend) = &self.backend else {
            record.digest = compute_digest(&record)?;
            debug!(entity_type = %record.entity_type, entity_id = %record.entity_id, "audit ledger disabled; event not stored");
            return Ok(record);
        };

        for attempt in 0..MAX_KEY_ATTEMPTS {
            record.timestamp = timestamp;
            let key = record_key(&record.entity_type, &record.entity_id, timestamp)?;
            record.digest = compute_digest(&record)?;
            let bytes = serde_json::to_vec(&record).map_err(codec_error)?;

            match backend.append(&key, &bytes) {
                Ok(()) => {
                    debug!(key = %key, action = %record.action, "audit event appended");
                    return Ok(record);
                }
                Err(LedgerError::DuplicateKey(_)) => {
                    timestamp = next_free_timestamp(backend.as_ref(), &record, timestamp)?;
                    debug!(key = %key, attempt, next = %timestamp, "audit key taken; advancing timestamp");
                }
                Err(err) => return Err(err),
            }
        }

        Err(LedgerError::DuplicateKey(format!(
            "no free key for {}:{} after {} contended attempts",
            record.entity_type, record.entity_id, MAX_KEY_ATTEMPTS
        )))
    }

    pub fn log_user_event(
        &self,
        subject: UserId,
        action: AuditAction,
        actor: Actor,
        changes: Changes,
    ) -> Result<AuditEvent, LedgerError> {
        self.log_event(
            NewAuditEvent::new(ENTITY_USER, subject.to_string(), action, actor).with_changes(changes),
        )
    }

    pub fn log_equipment_event(
        &self,
        equipment_id: impl core::fmt::Display,
        action: AuditAction,
        actor: Actor,
        changes: Changes,
    ) -> Result<AuditEvent, LedgerError> {
        self.log_event(
            NewAuditEvent::new(ENTITY_EQUIPMENT, equipment_id.to_string(), action, actor)
                .with_changes(changes),
        )
    }

    pub fn log_hand_receipt_event(
        &self,
        receipt_id: impl core::fmt::Display,
        action: AuditAction,
        actor: Actor,
        changes: Changes,
    ) -> Result<AuditEvent, LedgerError> {
        self.log_event(
            NewAuditEvent::new(ENTITY_HAND_RECEIPT, receipt_id.to_string(), action, actor)
                .with_changes(changes),
        )
    }

    /// Amend `original` by appending a `correction` record on the same entity.
    ///
    /// The reason is stored in the record's metadata under `reason`.
    pub fn log_correction(
        &self,
        original: AuditEventId,
        actor: Actor,
        reason: &str,
        changes: Changes,
    ) -> Result<AuditEvent, LedgerError> {
        let Some(target) = self.get_event_by_id(original)? else {
            return Err(LedgerError::NotFound(original.to_string()));
        };

        let mut event = NewAuditEvent::new(
            target.entity_type,
            target.entity_id,
            AuditAction::Correction,
            actor,
        )
        .with_changes(changes.metadata("reason", reason));
        event.corrects = Some(original);
        self.log_event(event)
    }

    /// Corrections amending `original`, newest first. Empty when the
    /// original is unknown.
    pub fn get_corrections(&self, original: AuditEventId) -> Result<Vec<AuditEvent>, LedgerError> {
        let Some(target) = self.get_event_by_id(original)? else {
            return Ok(Vec::new());
        };
        let filter = AuditFilter {
            action: Some(AuditAction::Correction),
            limit: Some(MAX_SEARCH_LIMIT),
            ..AuditFilter::for_entity(target.entity_type, target.entity_id)
        }
        .correcting(original);
        self.search(&filter)
    }

    /// Records of one entity, newest first.
    pub fn get_trail(&self, entity_type: &str, entity_id: &str) -> Result<Vec<AuditEvent>, LedgerError> {
        let Some(backend) = &self.backend else {
            return Ok(Vec::new());
        };
        let prefix = entity_prefix(entity_type, entity_id)?;
        let entries = backend.scan(&prefix, self.config.trail_page)?;
        let mut events = decode_entries(entries);
        sort_newest_first(&mut events);
        Ok(events)
    }

    /// Filtered search, newest first.
    ///
    /// The scan uses the narrowest prefix the filter allows (entity, then
    /// type, then the whole ledger); all other criteria are applied to the
    /// scanned records.
    pub fn search(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>, LedgerError> {
        let Some(backend) = &self.backend else {
            return Ok(Vec::new());
        };
        let prefix = match (&filter.entity_type, &filter.entity_id) {
            (Some(t), Some(id)) => entity_prefix(t, id)?,
            (Some(t), None) => type_prefix(t)?,
            _ => ROOT_PREFIX.to_string(),
        };

        let entries = backend.scan(&prefix, self.config.scan_cap)?;
        let mut events: Vec<AuditEvent> = decode_entries(entries)
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        sort_newest_first(&mut events);

        Ok(events
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.effective_limit())
            .collect())
    }

    /// Look a record up by id (bounded whole-ledger scan).
    pub fn get_event_by_id(&self, id: AuditEventId) -> Result<Option<AuditEvent>, LedgerError> {
        let Some(backend) = &self.backend else {
            return Ok(None);
        };
        let entries = backend.scan(ROOT_PREFIX, self.config.scan_cap)?;
        Ok(decode_entries(entries).into_iter().find(|e| e.id == id))
    }

    pub fn verify_integrity(&self, entity_type: &str, entity_id: &str) -> Result<bool, LedgerError> {
        Ok(self.integrity_report(entity_type, entity_id)?.is_verified())
    }

    /// Re-read and check every record of one entity.
    ///
    /// Fails closed: a record that cannot be re-read, decoded or re-sealed
    /// to the same digest is a failure, and so is a trail longer than the
    /// scan cap, since it could not be checked completely. A failing scan is
    /// an error, never a pass.
    pub fn integrity_report(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<IntegrityReport, LedgerError> {
        let Some(backend) = &self.backend else {
            return Ok(IntegrityReport::default());
        };
        let prefix = entity_prefix(entity_type, entity_id)?;
        let cap = self.config.scan_cap;
        let entries = backend.scan(&prefix, cap.saturating_add(1))?;

        let mut report = IntegrityReport::default();
        if entries.len() > cap {
            report.failures.push(IntegrityFailure {
                key: prefix.clone(),
                issue: IntegrityIssue::Unreadable(format!("trail exceeds scan cap of {cap} records")),
            });
        }

        for entry in entries.into_iter().take(cap) {
            report.checked += 1;
            if let Some(issue) = check_entry(backend.as_ref(), &entry) {
                warn!(key = %entry.key, issue = ?issue, "audit record failed verification");
                report.failures.push(IntegrityFailure {
                    key: entry.key,
                    issue,
                });
            }
        }
        Ok(report)
    }

    /// Counts by action and by actor over records in `[start, end]`,
    /// optionally restricted to one entity type.
    pub fn get_statistics(
        &self,
        entity_type: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<AuditStatistics, LedgerError> {
        let mut stats = AuditStatistics {
            start,
            end,
            ..AuditStatistics::default()
        };
        let Some(backend) = &self.backend else {
            return Ok(stats);
        };

        let prefix = match entity_type {
            Some(t) => type_prefix(t)?,
            None => ROOT_PREFIX.to_string(),
        };
        let cap = self.config.scan_cap;
        let mut entries = backend.scan(&prefix, cap.saturating_add(1))?;
        if entries.len() > cap {
            stats.truncated = true;
            entries.truncate(cap);
        }

        for event in decode_entries(entries) {
            if !in_window(event.timestamp, start, end) {
                continue;
            }
            stats.total_events += 1;
            *stats.events_by_action.entry(event.action).or_default() += 1;
            *stats.events_by_actor.entry(event.actor_user_id).or_default() += 1;
        }
        Ok(stats)
    }
}

/// Hex SHA-256 over the canonical JSON of `event` with its digest cleared.
pub fn compute_digest(event: &AuditEvent) -> Result<String, LedgerError> {
    let mut unsealed = event.clone();
    unsealed.digest.clear();
    let bytes = serde_json::to_vec(&unsealed).map_err(codec_error)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// One nanosecond past the latest key of `record`'s entity in the second
/// of `taken`, which is itself a key already in use.
fn next_free_timestamp(
    backend: &dyn LedgerBackend,
    record: &AuditEvent,
    taken: DateTime<Utc>,
) -> Result<DateTime<Utc>, LedgerError> {
    let taken_nanos = timestamp_nanos(taken)?;
    let prefix = second_prefix(&record.entity_type, &record.entity_id, taken)?;
    let latest = backend
        .last_key(&prefix)?
        .and_then(|key| key_nanos(&key))
        .map_or(taken_nanos, |nanos| nanos.max(taken_nanos));
    Ok(taken + Duration::nanoseconds(latest - taken_nanos + 1))
}

fn codec_error(err: serde_json::Error) -> LedgerError {
    LedgerError::Codec(err.to_string())
}

fn check_entry(backend: &dyn LedgerBackend, entry: &LedgerEntry) -> Option<IntegrityIssue> {
    let reread = match backend.get(&entry.key) {
        Ok(bytes) => bytes,
        Err(err) => return Some(IntegrityIssue::Unreadable(err.to_string())),
    };
    if reread != entry.value {
        return Some(IntegrityIssue::Changed);
    }

    let record: AuditEvent = match serde_json::from_slice(&reread) {
        Ok(record) => record,
        Err(err) => return Some(IntegrityIssue::Undecodable(err.to_string())),
    };

    match record_key(&record.entity_type, &record.entity_id, record.timestamp) {
        Ok(key) if key == entry.key => {}
        _ => return Some(IntegrityIssue::KeyMismatch),
    }

    match compute_digest(&record) {
        Ok(digest) if digest == record.digest => None,
        _ => Some(IntegrityIssue::DigestMismatch),
    }
}

fn decode_entries(entries: Vec<LedgerEntry>) -> Vec<AuditEvent> {
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_slice::<AuditEvent>(&entry.value) {
            Ok(event) => Some(event),
            Err(err) => {
                warn!(key = %entry.key, error = %err, "skipping undecodable audit record");
                None
            }
        })
        .collect()
}

fn sort_newest_first(events: &mut [AuditEvent]) {
    events.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.entity_type.cmp(&a.entity_type))
            .then_with(|| b.entity_id.cmp(&a.entity_id))
    });
}
