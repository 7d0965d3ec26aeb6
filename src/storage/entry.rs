//! Value shapes held under a key and the operations on them.
//!
//! Backends load the slot for a key, run one of these functions on it,
//! and persist what is left. An expired value is treated as absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entry {
    Value {
        value: String,
        #[serde(default)]
        expires_at: Option<DateTime<Utc>>,
    },
    List {
        items: Vec<String>,
    },
    SortedSet {
        /// Ascending by score, then member.
        members: Vec<(String, f64)>,
    },
}

impl Entry {
    fn kind(&self) -> &'static str {
        match self {
            Entry::Value { .. } => "value",
            Entry::List { .. } => "list",
            Entry::SortedSet { .. } => "sorted set",
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self, Entry::Value { expires_at: Some(at), .. } if *at <= now)
    }
}

/// Drop the slot content if it has expired.
pub fn live(slot: Option<Entry>, now: DateTime<Utc>) -> Option<Entry> {
    slot.filter(|e| !e.is_expired(now))
}

fn wrong_type(entry: &Entry, wanted: &str) -> AppError {
    AppError::store(format!(
        "WRONGTYPE operation against a {} holding a {}",
        wanted,
        entry.kind()
    ))
}

/// Resolve an inclusive `start..=stop` range with negative indices into a slice range.
pub fn resolve_range(len: usize, start: i64, stop: i64) -> Option<std::ops::Range<usize>> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some(start as usize..(stop as usize + 1))
}

pub fn get(slot: Option<&Entry>) -> Result<Option<String>> {
    match slot {
        None => Ok(None),
        Some(Entry::Value { value, .. }) => Ok(Some(value.clone())),
        Some(other) => Err(wrong_type(other, "value")),
    }
}

pub fn set(slot: &mut Option<Entry>, value: String, expires_at: Option<DateTime<Utc>>) {
    *slot = Some(Entry::Value { value, expires_at });
}

pub fn set_if_absent(
    slot: &mut Option<Entry>,
    value: String,
    expires_at: Option<DateTime<Utc>>,
) -> bool {
    if slot.is_some() {
        return false;
    }
    set(slot, value, expires_at);
    true
}

pub fn incr_by(slot: &mut Option<Entry>, delta: i64) -> Result<i64> {
    let (current, expires_at) = match slot.as_ref() {
        None => (0, None),
        Some(Entry::Value { value, expires_at }) => {
            let n = value
                .trim()
                .parse::<i64>()
                .map_err(|_| AppError::store("value is not an integer"))?;
            (n, *expires_at)
        }
        Some(other) => return Err(wrong_type(other, "counter")),
    };
    let next = current
        .checked_add(delta)
        .ok_or_else(|| AppError::store("increment would overflow"))?;
    set(slot, next.to_string(), expires_at);
    Ok(next)
}

pub fn list_push(slot: &mut Option<Entry>, value: String) -> Result<usize> {
    match slot {
        None => {
            *slot = Some(Entry::List { items: vec![value] });
            Ok(1)
        }
        Some(Entry::List { items }) => {
            items.push(value);
            Ok(items.len())
        }
        Some(other) => Err(wrong_type(other, "list")),
    }
}

pub fn list_range(slot: Option<&Entry>, start: i64, stop: i64) -> Result<Vec<String>> {
    match slot {
        None => Ok(Vec::new()),
        Some(Entry::List { items }) => Ok(resolve_range(items.len(), start, stop)
            .map(|r| items[r].to_vec())
            .unwrap_or_default()),
        Some(other) => Err(wrong_type(other, "list")),
    }
}

pub fn list_trim(slot: &mut Option<Entry>, start: i64, stop: i64) -> Result<()> {
    match slot {
        None => Ok(()),
        Some(Entry::List { items }) => {
            match resolve_range(items.len(), start, stop) {
                Some(r) => *items = items[r].to_vec(),
                None => items.clear(),
            }
            if items.is_empty() {
                *slot = None;
            }
            Ok(())
        }
        Some(other) => Err(wrong_type(other, "list")),
    }
}

pub fn sorted_set_add(slot: &mut Option<Entry>, score: f64, member: String) -> Result<bool> {
    let members = match slot.get_or_insert_with(|| Entry::SortedSet {
        members: Vec::new(),
    }) {
        Entry::SortedSet { members } => members,
        other => return Err(wrong_type(other, "sorted set")),
    };
    let existed = match members.iter().position(|(m, _)| *m == member) {
        Some(idx) => {
            members.remove(idx);
            true
        }
        None => false,
    };
    let idx = members
        .partition_point(|(m, s)| s.total_cmp(&score).then_with(|| m.cmp(&member)).is_lt());
    members.insert(idx, (member, score));
    Ok(!existed)
}

pub fn sorted_set_range(slot: Option<&Entry>, start: i64, stop: i64) -> Result<Vec<(String, f64)>> {
    match slot {
        None => Ok(Vec::new()),
        Some(Entry::SortedSet { members }) => Ok(resolve_range(members.len(), start, stop)
            .map(|r| members[r].to_vec())
            .unwrap_or_default()),
        Some(other) => Err(wrong_type(other, "sorted set")),
    }
}

pub fn sorted_set_remove(slot: &mut Option<Entry>, member: &str) -> Result<bool> {
    match slot {
        None => Ok(false),
        Some(Entry::SortedSet { members }) => {
            let before = members.len();
            members.retain(|(m, _)| m != member);
            let removed = members.len() != before;
            if members.is_empty() {
                *slot = None;
            }
            Ok(removed)
        }
        Some(other) => Err(wrong_type(other, "sorted set")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_resolve_range() {
        assert_eq!(resolve_range(5, 0, -1), Some(0..5));
        assert_eq!(resolve_range(5, -2, -1), Some(3..5));
        assert_eq!(resolve_range(5, 1, 100), Some(1..5));
        assert_eq!(resolve_range(5, -100, 1), Some(0..2));
        assert_eq!(resolve_range(5, 3, 1), None);
        assert_eq!(resolve_range(0, 0, -1), None);
        assert_eq!(resolve_range(5, 7, 9), None);
    }

    #[test]
    fn test_sorted_set_orders_by_score_then_member() {
        let mut slot = None;
        assert!(sorted_set_add(&mut slot, 2.0, "b".into()).unwrap());
        assert!(sorted_set_add(&mut slot, 1.0, "z".into()).unwrap());
        assert!(sorted_set_add(&mut slot, 2.0, "a".into()).unwrap());
        assert!(!sorted_set_add(&mut slot, 0.5, "b".into()).unwrap());

        let members: Vec<String> = sorted_set_range(slot.as_ref(), 0, -1)
            .unwrap()
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        assert_eq!(members, vec!["b", "z", "a"]);
    }

    #[test]
    fn test_incr_on_text_fails() {
        let mut slot = None;
        set(&mut slot, "hello".into(), None);
        assert!(incr_by(&mut slot, 1).is_err());
    }

    #[test]
    fn test_wrong_type() {
        let mut slot = None;
        list_push(&mut slot, "x".into()).unwrap();
        assert!(get(slot.as_ref()).is_err());
        assert!(sorted_set_add(&mut slot, 1.0, "m".into()).is_err());
    }

    #[test]
    fn test_expired_value_is_absent() {
        let now = Utc::now();
        let slot = Some(Entry::Value {
            value: "lock".into(),
            expires_at: Some(now - Duration::seconds(1)),
        });
        assert!(live(slot, now).is_none());
    }

    #[test]
    fn test_trim_to_empty_clears_slot() {
        let mut slot = None;
        list_push(&mut slot, "a".into()).unwrap();
        list_trim(&mut slot, 5, 10).unwrap();
        assert!(slot.is_none());
    }
}
