//! Core data structures for offset bookkeeping
//!
//! - `IdentityKey` - aggregation key (resolved FSM id or pending alias)
//! - `RangeSummary` - coalesced offsets for one identity/topic/partition
//! - `OffsetRow` / `RecentRow` - flat rows returned by the store
//! - `FsmCreation` / `AliasBinding` - write-side records for FSMs and aliases

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Aggregation key for one logical processing unit
///
/// A non-empty resolved id always wins; the alias is only used as the key when
/// no resolved id is known yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentityKey {
    Resolved(String),
    Pending(String),
}

impl IdentityKey {
    /// Normalize a `(resolved_id, alias)` pair into a key.
    ///
    /// Returns `None` when both are empty.
    pub fn from_parts(resolved_id: &str, alias: &str) -> Option<Self> {
        if !resolved_id.is_empty() {
            Some(IdentityKey::Resolved(resolved_id.to_string()))
        } else if !alias.is_empty() {
            Some(IdentityKey::Pending(alias.to_string()))
        } else {
            None
        }
    }
}

/// Offsets observed for one identity/topic/partition within a window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSummary {
    /// Offset of the first event folded into this window (never changes)
    pub start_offset: i64,
    /// Offset of the most recent event (overwritten, not a maximum)
    pub last_offset: i64,
    /// Number of events folded in
    pub count: i64,
    pub updated_at: DateTime<Utc>,
}

impl RangeSummary {
    pub fn first(offset: i64, now: DateTime<Utc>) -> Self {
        Self {
            start_offset: offset,
            last_offset: offset,
            count: 1,
            updated_at: now,
        }
    }

    pub fn fold(&mut self, offset: i64, now: DateTime<Utc>) {
        self.last_offset = offset;
        self.count += 1;
        self.updated_at = now;
    }
}

/// Historical alias for a resolved FSM id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AliasBinding {
    pub fsm_id: String,
    pub fsm_alias: String,
}

/// First observation of an FSM instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsmCreation {
    pub fsm_id: String,
    pub created: DateTime<Utc>,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Persisted offset row for a resolved identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetRow {
    pub fsm_id: String,
    pub topic: String,
    pub partition: i32,
    pub start_offset: i64,
    pub last_offset: i64,
    pub count: i64,
    pub updated: DateTime<Utc>,
}

/// Partition-level slice of a persisted row, as joined onto an FSM record
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionRow {
    pub topic: String,
    pub partition: i32,
    pub start_offset: i64,
    pub last_offset: i64,
    pub count: i64,
}

/// One row of the recent-FSMs query
///
/// `offsets` is `None` for an FSM record that has no offset rows yet.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentRow {
    pub fsm_id: String,
    pub created: DateTime<Utc>,
    pub offsets: Option<PartitionRow>,
}

/// Last scraped offsets for one topic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopicRecord {
    pub topic: String,
    pub partitions: HashMap<i32, i64>,
}

/// Validated row limit for the recent-FSMs query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecentLimit(u32);

impl RecentLimit {
    pub const DEFAULT: u32 = 10;

    pub fn new(n: i64) -> crate::Result<Self> {
        if n <= 0 {
            return Err(crate::LedgerError::invalid(format!(
                "n must be a positive integer, got {}",
                n
            )));
        }
        let n = u32::try_from(n)
            .map_err(|_| crate::LedgerError::invalid(format!("n is too large: {}", n)))?;
        Ok(Self(n))
    }

    /// Parse a raw query value; missing or empty input yields the default.
    pub fn parse(raw: Option<&str>) -> crate::Result<Self> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::default()),
            Some(s) => {
                let n: i64 = s
                    .parse()
                    .map_err(|_| crate::LedgerError::invalid(format!("n is not an integer: {:?}", s)))?;
                Self::new(n)
            }
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for RecentLimit {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

/// Convert a stored millisecond timestamp back into UTC
pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}
