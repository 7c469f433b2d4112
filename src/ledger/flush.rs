//! Flush batcher - turns a drained window into batch upserts
//!
//! A drained `AggregationWindow` is split by identity-resolution state:
//! - resolved identities → `offsets` table
//! - alias-only identities → `pending_offsets` table
//!
//! Each batch becomes one multi-row upsert with the merge rule:
//!
//! ```sql
//! ON CONFLICT(<key>, topic, topic_partition) DO UPDATE SET
//!     last_offset = excluded.last_offset,
//!     count       = <table>.count + excluded.count,
//!     updated_at  = <server now>
//! ```
//!
//! The merge is additive: re-applying a batch keeps `last_offset` but adds
//! its `count` again. At-least-once redelivery therefore over-counts; it
//! never loses rows.

use super::aggregator::AggregationWindow;
use super::types::{AliasBinding, IdentityKey, RangeSummary};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;

/// Columns bound per row in the multi-row VALUES clause
const COLUMNS_PER_ROW: usize = 7;

/// Upper bound on rows per statement (SQLite bound-parameter limit is 32766)
pub const MAX_ROWS_PER_STATEMENT: usize = 4_000;

/// Destination table of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchTarget {
    Resolved,
    Pending,
}

impl BatchTarget {
    pub fn table(self) -> &'static str {
        match self {
            BatchTarget::Resolved => "offsets",
            BatchTarget::Pending => "pending_offsets",
        }
    }

    pub fn key_column(self) -> &'static str {
        match self {
            BatchTarget::Resolved => "fsm_id",
            BatchTarget::Pending => "fsm_alias",
        }
    }
}

/// One row of a batch upsert
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRow {
    pub key: String,
    pub topic: String,
    pub partition: i32,
    pub summary: RangeSummary,
}

/// All rows bound for one table
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetBatch {
    pub target: BatchTarget,
    pub rows: Vec<BatchRow>,
}

/// Parameterized SQL ready for execution
#[derive(Debug, Clone)]
pub struct UpsertStatement {
    pub sql: String,
    pub values: Vec<Value>,
}

impl OffsetBatch {
    pub fn new(target: BatchTarget, rows: Vec<BatchRow>) -> Self {
        Self { target, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Total events represented by this batch
    pub fn event_count(&self) -> i64 {
        self.rows.iter().map(|r| r.summary.count).sum()
    }

    /// Build the upsert statements for this batch.
    ///
    /// One statement per `MAX_ROWS_PER_STATEMENT` rows; the store runs them in
    /// a single transaction. An empty batch yields no statements.
    pub fn statements(&self, now: DateTime<Utc>) -> Vec<UpsertStatement> {
        self.rows
            .chunks(MAX_ROWS_PER_STATEMENT)
            .map(|chunk| self.statement_for(chunk, now))
            .collect()
    }

    fn statement_for(&self, rows: &[BatchRow], now: DateTime<Utc>) -> UpsertStatement {
        let table = self.target.table();
        let key = self.target.key_column();

        let sql = format!(
            "INSERT INTO {table} ({key}, topic, topic_partition, start_offset, last_offset, count, updated_at) \
             VALUES {tuples} \
             ON CONFLICT({key}, topic, topic_partition) DO UPDATE SET \
             last_offset = excluded.last_offset, \
             count = {table}.count + excluded.count, \
             updated_at = ?",
            table = table,
            key = key,
            tuples = build_insert_tuples(COLUMNS_PER_ROW, rows.len()),
        );

        let mut values = Vec::with_capacity(rows.len() * COLUMNS_PER_ROW + 1);
        for row in rows {
            values.push(Value::Text(row.key.clone()));
            values.push(Value::Text(row.topic.clone()));
            values.push(Value::Integer(i64::from(row.partition)));
            values.push(Value::Integer(row.summary.start_offset));
            values.push(Value::Integer(row.summary.last_offset));
            values.push(Value::Integer(row.summary.count));
            values.push(Value::Integer(row.summary.updated_at.timestamp_millis()));
        }
        values.push(Value::Integer(now.timestamp_millis()));

        UpsertStatement { sql, values }
    }
}

/// Everything one flush cycle must persist
#[derive(Debug, Default)]
pub struct FlushPlan {
    /// Pending batch first, then resolved; empty batches are omitted
    pub batches: Vec<OffsetBatch>,
    pub aliases: Vec<AliasBinding>,
}

impl FlushPlan {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.aliases.is_empty()
    }

    pub fn batch(&self, target: BatchTarget) -> Option<&OffsetBatch> {
        self.batches.iter().find(|b| b.target == target)
    }
}

/// Split a drained window into per-table batches.
pub fn build_batches(window: AggregationWindow) -> FlushPlan {
    let (entries, aliases) = window.into_parts();

    let mut resolved = Vec::new();
    let mut pending = Vec::new();

    for (identity, topics) in entries {
        for (topic, partitions) in topics {
            for (partition, summary) in partitions {
                let (rows, key) = match &identity {
                    IdentityKey::Resolved(id) => (&mut resolved, id),
                    IdentityKey::Pending(alias) => (&mut pending, alias),
                };
                rows.push(BatchRow {
                    key: key.clone(),
                    topic: topic.clone(),
                    partition,
                    summary,
                });
            }
        }
    }

    let mut batches = Vec::with_capacity(2);
    for (target, mut rows) in [(BatchTarget::Pending, pending), (BatchTarget::Resolved, resolved)] {
        if rows.is_empty() {
            continue;
        }
        rows.sort_by(|a, b| {
            (&a.key, &a.topic, a.partition).cmp(&(&b.key, &b.topic, b.partition))
        });
        batches.push(OffsetBatch::new(target, rows));
    }

    let mut aliases: Vec<_> = aliases.into_iter().collect();
    aliases.sort();

    FlushPlan { batches, aliases }
}

/// `(?, ?, ?), (?, ?, ?)` for `rows` tuples of `columns` placeholders
fn build_insert_tuples(columns: usize, rows: usize) -> String {
    let tuple = format!("({})", vec!["?"; columns].join(", "));
    vec![tuple; rows].join(", ")
}
