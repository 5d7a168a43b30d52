//! Ledger key scheme: `audit:{entity_type}:{entity_id}:{timestamp_nanos}`.
//!
//! Nanoseconds are zero-padded to 20 digits so that lexicographic key order
//! equals chronological order within an entity. Entity segments may not be
//! empty or contain `:`; otherwise one entity's prefix could match another's.

use chrono::{DateTime, Utc};

use super::backend::LedgerError;

pub const ROOT_PREFIX: &str = "audit:";

const SEPARATOR: char = ':';

fn check_segment(kind: &str, value: &str) -> Result<(), LedgerError> {
    if value.is_empty() {
        return Err(LedgerError::InvalidKey(format!("{kind} must not be empty")));
    }
    if value.contains(SEPARATOR) {
        return Err(LedgerError::InvalidKey(format!(
            "{kind} {value:?} must not contain '{SEPARATOR}'"
        )));
    }
    Ok(())
}

/// Nanoseconds since the Unix epoch, for timestamps the key can represent.
pub fn timestamp_nanos(timestamp: DateTime<Utc>) -> Result<i64, LedgerError> {
    match timestamp.timestamp_nanos_opt() {
        Some(nanos) if nanos >= 0 => Ok(nanos),
        _ => Err(LedgerError::InvalidKey(format!(
            "timestamp {timestamp} is outside the representable key range"
        ))),
    }
}

pub fn record_key(
    entity_type: &str,
    entity_id: &str,
    timestamp: DateTime<Utc>,
) -> Result<String, LedgerError> {
    check_segment("entity type", entity_type)?;
    check_segment("entity id", entity_id)?;
    let nanos = timestamp_nanos(timestamp)?;
    Ok(format!("{ROOT_PREFIX}{entity_type}:{entity_id}:{nanos:020}"))
}

/// Prefix of every key of one entity stamped within the same second as
/// `timestamp`: the padded nanos minus their nine sub-second digits.
pub fn second_prefix(
    entity_type: &str,
    entity_id: &str,
    timestamp: DateTime<Utc>,
) -> Result<String, LedgerError> {
    let key = record_key(entity_type, entity_id, timestamp)?;
    Ok(key[..key.len() - 9].to_string())
}

/// The nanosecond timestamp embedded in a record key.
pub fn key_nanos(key: &str) -> Option<i64> {
    key.rsplit(SEPARATOR).next()?.parse().ok()
}

pub fn entity_prefix(entity_type: &str, entity_id: &str) -> Result<String, LedgerError> {
    check_segment("entity type", entity_type)?;
    check_segment("entity id", entity_id)?;
    Ok(format!("{ROOT_PREFIX}{entity_type}:{entity_id}:"))
}

pub fn type_prefix(entity_type: &str) -> Result<String, LedgerError> {
    check_segment("entity type", entity_type)?;
    Ok(format!("{ROOT_PREFIX}{entity_type}:"))
}

/// Smallest string greater than every string starting with `prefix`, if one
/// exists. Used by range scans.
pub fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let mut next = last as u32 + 1;
        // Skip the surrogate range, which has no `char` values.
        if (0xD800..=0xDFFF).contains(&next) {
            next = 0xE000;
        }
        if let Some(c) = char::from_u32(next) {
            chars.push(c);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn key_embeds_padded_nanos() {
        let at = Utc.timestamp_opt(1, 5).unwrap();
        assert_eq!(
            record_key("property", "42", at).unwrap(),
            "audit:property:42:00000000001000000005"
        );
    }

    #[test]
    fn keys_sort_chronologically() {
        let early = Utc.timestamp_opt(9, 0).unwrap();
        let late = Utc.timestamp_opt(10, 0).unwrap();
        let a = record_key("property", "42", early).unwrap();
        let b = record_key("property", "42", late).unwrap();
        assert!(a < b);
    }

    #[test]
    fn invalid_segments_are_rejected() {
        let at = Utc::now();
        assert!(matches!(record_key("", "1", at), Err(LedgerError::InvalidKey(_))));
        assert!(matches!(record_key("property", "", at), Err(LedgerError::InvalidKey(_))));
        assert!(matches!(entity_prefix("property", "4:2"), Err(LedgerError::InvalidKey(_))));
        assert!(matches!(type_prefix("a:b"), Err(LedgerError::InvalidKey(_))));
    }

    #[test]
    fn second_prefix_groups_keys_of_one_second() {
        let at = Utc.timestamp_opt(1, 5).unwrap();
        let prefix = second_prefix("property", "42", at).unwrap();
        assert_eq!(prefix, "audit:property:42:00000000001");

        let same_second = record_key("property", "42", Utc.timestamp_opt(1, 999_999_999).unwrap()).unwrap();
        let next_second = record_key("property", "42", Utc.timestamp_opt(2, 0).unwrap()).unwrap();
        assert!(same_second.starts_with(&prefix));
        assert!(!next_second.starts_with(&prefix));
    }

    #[test]
    fn key_nanos_reads_the_timestamp_back() {
        let key = record_key("property", "42", Utc.timestamp_opt(1, 5).unwrap()).unwrap();
        assert_eq!(key_nanos(&key), Some(1_000_000_005));
        assert_eq!(key_nanos("audit:property:42:"), None);
    }

    #[test]
    fn pre_epoch_timestamps_are_rejected() {
        let before = Utc.timestamp_opt(-1, 0).unwrap();
        assert!(matches!(timestamp_nanos(before), Err(LedgerError::InvalidKey(_))));
    }

    #[test]
    fn prefixes_do_not_overlap_between_ids() {
        let p1 = entity_prefix("property", "1").unwrap();
        let k12 = record_key("property", "12", Utc::now()).unwrap();
        assert!(!k12.starts_with(&p1));
        assert_eq!(type_prefix("property").unwrap(), "audit:property:");
    }

    #[test]
    fn upper_bound_follows_prefix() {
        assert_eq!(prefix_upper_bound("audit:").as_deref(), Some("audit;"));
        assert_eq!(prefix_upper_bound("a\u{D7FF}").as_deref(), Some("a\u{E000}"));
        assert_eq!(prefix_upper_bound("b\u{10FFFF}").as_deref(), Some("c"));
        assert_eq!(prefix_upper_bound(""), None);

        let bound = prefix_upper_bound("audit:property:").unwrap();
        let key = record_key("property", "zz", Utc::now()).unwrap();
        assert!(key.as_str() < bound.as_str());
    }
}
