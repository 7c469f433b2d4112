//! Persistence gateway for offset bookkeeping
//!
//! `OffsetStore` is the durable store contract; `SqliteOffsetStore` is the
//! rusqlite implementation.
//!
//! Tables (see `/sql/`):
//! - `fsm` - one row per resolved identity, `created_at` set once
//! - `offsets` - UPSERT on (fsm_id, topic, topic_partition), additive merge
//! - `pending_offsets` - same shape keyed by alias until resolution
//! - `fsm_aliases` - INSERT OR IGNORE on (fsm_id, fsm_alias)
//! - `scrapes` - UPSERT on (topic, topic_partition)
//!
//! Every offset write (flush batches, FSM creation, pending promotion) goes
//! through `execute_upsert`, so there is exactly one merge contract.

use super::flush::{BatchRow, BatchTarget, OffsetBatch};
use super::types::{
    from_millis, AliasBinding, FsmCreation, OffsetRow, PartitionRow, RangeSummary, RecentLimit,
    RecentRow, TopicRecord,
};
use crate::sqlite_pragma::apply_optimized_pragmas;
use crate::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task::spawn_blocking;

/// Schema files, applied in order. All use IF NOT EXISTS.
const MIGRATIONS: &[(&str, &str)] = &[
    ("01_fsm.sql", include_str!("../../sql/01_fsm.sql")),
    ("02_offsets.sql", include_str!("../../sql/02_offsets.sql")),
    ("03_fsm_aliases.sql", include_str!("../../sql/03_fsm_aliases.sql")),
    ("04_scrapes.sql", include_str!("../../sql/04_scrapes.sql")),
];

/// Durable store contract
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Apply one batch with the merge rule, atomically.
    ///
    /// Returns the number of rows submitted. An empty batch is a no-op.
    async fn upsert_offset_batch(&self, batch: &OffsetBatch) -> Result<usize>;

    /// Create the FSM record if absent and record its first observation.
    ///
    /// An existing record keeps its original `created_at`.
    async fn upsert_fsm(&self, creation: &FsmCreation) -> Result<()>;

    /// Store a historical alias for an identity. Re-recording is a no-op.
    async fn record_alias(&self, fsm_id: &str, fsm_alias: &str) -> Result<()>;

    /// Store several alias bindings in one transaction.
    async fn record_aliases(&self, bindings: &[AliasBinding]) -> Result<usize>;

    /// All offset rows for one identity; empty when unknown.
    async fn query_by_identity(&self, fsm_id: &str) -> Result<Vec<OffsetRow>>;

    /// The `limit` most recently created FSMs with their offset rows,
    /// newest first.
    async fn query_recent(&self, limit: RecentLimit) -> Result<Vec<RecentRow>>;

    /// Pending rows recorded under one alias. `fsm_id` carries the alias.
    async fn query_pending(&self, fsm_alias: &str) -> Result<Vec<OffsetRow>>;

    /// Most recently bound identity for an alias
    async fn lookup_alias(&self, fsm_alias: &str) -> Result<Option<String>>;

    /// Distinct aliases that still have pending rows
    async fn pending_aliases(&self) -> Result<Vec<String>>;

    /// Move an alias's pending rows under `fsm_id` using the merge rule.
    ///
    /// Records the alias and deletes the pending rows in the same
    /// transaction. Returns the number of rows moved.
    async fn promote_pending(&self, fsm_alias: &str, fsm_id: &str) -> Result<usize>;

    /// Record the last observed offset for a topic partition.
    async fn record_scrape(&self, topic: &str, partition: i32, offset: i64) -> Result<()>;

    /// Last scraped offsets, keyed by topic
    async fn load_scrapes(&self) -> Result<HashMap<String, TopicRecord>>;
}

/// Run the embedded schema migrations
///
/// Idempotent: every statement uses IF NOT EXISTS.
pub fn run_schema_migrations(conn: &Connection) -> Result<()> {
    log::info!("🔧 Running schema migrations");

    for (name, sql) in MIGRATIONS {
        log::debug!("   ├─ Executing: {}", name);
        conn.execute_batch(sql)?;
    }

    log::info!("✅ Schema migrations completed ({} files)", MIGRATIONS.len());
    Ok(())
}

/// SQLite implementation of OffsetStore
///
/// rusqlite calls block, so every method runs its statements on the tokio
/// blocking pool. The async side never holds the connection lock, which keeps
/// `tokio::time::timeout` around a store call effective.
pub struct SqliteOffsetStore {
    conn: Arc<Mutex<Connection>>,
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl SqliteOffsetStore {
    /// Open (or create) the database file, apply PRAGMAs and the schema.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        run_schema_migrations(&conn)?;

        log::info!("✅ SQLite offset store ready: {}", db_path.display());
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_schema_migrations(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            now_fn: Box::new(Utc::now),
        }
    }

    /// Replace the clock used for server-side timestamps
    pub fn with_clock(mut self, now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.now_fn = now_fn;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_fn)()
    }

    /// Run `func` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, func: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| LedgerError::LockPoisoned)?;
            func(&mut guard)
        })
        .await?
    }
}

/// Execute a batch's upsert statements on an open transaction
fn execute_upsert(conn: &Connection, batch: &OffsetBatch, now: DateTime<Utc>) -> Result<usize> {
    for stmt in batch.statements(now) {
        conn.execute(&stmt.sql, params_from_iter(stmt.values.iter()))?;
    }
    Ok(batch.len())
}

fn insert_alias(conn: &Connection, fsm_id: &str, fsm_alias: &str, now: DateTime<Utc>) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO fsm_aliases (fsm_id, fsm_alias, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(fsm_id, fsm_alias) DO NOTHING",
        params![fsm_id, fsm_alias, now.timestamp_millis()],
    )?;
    Ok(inserted > 0)
}

const SELECT_PENDING: &str =
    "SELECT fsm_alias, topic, topic_partition, start_offset, last_offset, count, updated_at
     FROM pending_offsets
     WHERE fsm_alias = ?1
     ORDER BY topic, topic_partition";

fn select_rows(conn: &Connection, sql: &str, key: &str) -> Result<Vec<OffsetRow>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map([key], |row| {
        Ok(OffsetRow {
            fsm_id: row.get(0)?,
            topic: row.get(1)?,
            partition: row.get(2)?,
            start_offset: row.get(3)?,
            last_offset: row.get(4)?,
            count: row.get(5)?,
            updated: from_millis(row.get(6)?),
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[async_trait]
impl OffsetStore for SqliteOffsetStore {
    async fn upsert_offset_batch(&self, batch: &OffsetBatch) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let now = self.now();
        let batch = batch.clone();
        let table = batch.target.table();
        let written = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let written = execute_upsert(&tx, &batch, now)?;
                tx.commit()?;
                Ok(written)
            })
            .await?;

        log::debug!("✅ Upserted {} rows into {}", written, table);
        Ok(written)
    }

    async fn upsert_fsm(&self, creation: &FsmCreation) -> Result<()> {
        if creation.fsm_id.is_empty() {
            return Err(LedgerError::invalid("fsm id cannot be empty"));
        }

        let now = self.now();
        let fsm_id = creation.fsm_id.clone();
        let created_ms = creation.created.timestamp_millis();
        let first_observation = OffsetBatch::new(
            BatchTarget::Resolved,
            vec![BatchRow {
                key: creation.fsm_id.clone(),
                topic: creation.topic.clone(),
                partition: creation.partition,
                summary: RangeSummary::first(creation.offset, now),
            }],
        );

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO fsm (fsm_id, created_at) VALUES (?1, ?2)
                 ON CONFLICT(fsm_id) DO NOTHING",
                params![fsm_id, created_ms],
            )?;
            execute_upsert(&tx, &first_observation, now)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn record_alias(&self, fsm_id: &str, fsm_alias: &str) -> Result<()> {
        if fsm_id.is_empty() || fsm_alias.is_empty() {
            return Err(LedgerError::invalid("alias binding needs both fsm id and alias"));
        }

        let now = self.now();
        let fsm_id = fsm_id.to_string();
        let fsm_alias = fsm_alias.to_string();
        self.with_conn(move |conn| {
            if !insert_alias(conn, &fsm_id, &fsm_alias, now)? {
                log::debug!("Alias {} already recorded for {}", fsm_alias, fsm_id);
            }
            Ok(())
        })
        .await
    }

    async fn record_aliases(&self, bindings: &[AliasBinding]) -> Result<usize> {
        if bindings.is_empty() {
            return Ok(0);
        }

        let now = self.now();
        let bindings = bindings.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0;
            for binding in &bindings {
                if insert_alias(&tx, &binding.fsm_id, &binding.fsm_alias, now)? {
                    inserted += 1;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    async fn query_by_identity(&self, fsm_id: &str) -> Result<Vec<OffsetRow>> {
        let fsm_id = fsm_id.to_string();
        self.with_conn(move |conn| {
            select_rows(
                conn,
                "SELECT fsm_id, topic, topic_partition, start_offset, last_offset, count, updated_at
                 FROM offsets
                 WHERE fsm_id = ?1
                 ORDER BY topic, topic_partition",
                &fsm_id,
            )
        })
        .await
    }

    async fn query_recent(&self, limit: RecentLimit) -> Result<Vec<RecentRow>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT f.fsm_id, f.created_at, o.topic, o.topic_partition,
                        o.start_offset, o.last_offset, o.count
                 FROM (SELECT fsm_id, created_at FROM fsm
                       ORDER BY created_at DESC, fsm_id
                       LIMIT ?1) f
                 LEFT JOIN offsets o ON o.fsm_id = f.fsm_id
                 ORDER BY f.created_at DESC, f.fsm_id, o.topic, o.topic_partition",
            )?;

            let rows = stmt.query_map([limit.get()], |row| {
                let topic: Option<String> = row.get(2)?;
                let offsets = match topic {
                    Some(topic) => Some(PartitionRow {
                        topic,
                        partition: row.get(3)?,
                        start_offset: row.get(4)?,
                        last_offset: row.get(5)?,
                        count: row.get(6)?,
                    }),
                    None => None,
                };
                Ok(RecentRow {
                    fsm_id: row.get(0)?,
                    created: from_millis(row.get(1)?),
                    offsets,
                })
            })?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    async fn query_pending(&self, fsm_alias: &str) -> Result<Vec<OffsetRow>> {
        let fsm_alias = fsm_alias.to_string();
        self.with_conn(move |conn| select_rows(conn, SELECT_PENDING, &fsm_alias))
            .await
    }

    async fn lookup_alias(&self, fsm_alias: &str) -> Result<Option<String>> {
        let fsm_alias = fsm_alias.to_string();
        self.with_conn(move |conn| {
            let fsm_id = conn
                .query_row(
                    "SELECT fsm_id FROM fsm_aliases
                     WHERE fsm_alias = ?1
                     ORDER BY created_at DESC, fsm_id
                     LIMIT 1",
                    [&fsm_alias],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(fsm_id)
        })
        .await
    }

    async fn pending_aliases(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached("SELECT DISTINCT fsm_alias FROM pending_offsets ORDER BY fsm_alias")?;
            let aliases = stmt.query_map([], |row| row.get(0))?;

            let mut out = Vec::new();
            for alias in aliases {
                out.push(alias?);
            }
            Ok(out)
        })
        .await
    }

    async fn promote_pending(&self, fsm_alias: &str, fsm_id: &str) -> Result<usize> {
        if fsm_id.is_empty() || fsm_alias.is_empty() {
            return Err(LedgerError::invalid("promotion needs both fsm id and alias"));
        }

        let now = self.now();
        let fsm_alias = fsm_alias.to_string();
        let fsm_id = fsm_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let rows = select_rows(&tx, SELECT_PENDING, &fsm_alias)?
                .into_iter()
                .map(|row| BatchRow {
                    key: fsm_id.clone(),
                    topic: row.topic,
                    partition: row.partition,
                    summary: RangeSummary {
                        start_offset: row.start_offset,
                        last_offset: row.last_offset,
                        count: row.count,
                        updated_at: row.updated,
                    },
                })
                .collect();
            let moved = execute_upsert(&tx, &OffsetBatch::new(BatchTarget::Resolved, rows), now)?;

            insert_alias(&tx, &fsm_id, &fsm_alias, now)?;
            tx.execute("DELETE FROM pending_offsets WHERE fsm_alias = ?1", [&fsm_alias])?;
            tx.commit()?;

            Ok(moved)
        })
        .await
    }

    async fn record_scrape(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let now = self.now();
        let topic = topic.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO scrapes (topic, topic_partition, last_offset, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(topic, topic_partition) DO UPDATE SET
                     last_offset = excluded.last_offset,
                     updated_at = excluded.updated_at",
                params![topic, partition, offset, now.timestamp_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn load_scrapes(&self) -> Result<HashMap<String, TopicRecord>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT topic, topic_partition, last_offset FROM scrapes")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i32>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;

            let mut records: HashMap<String, TopicRecord> = HashMap::new();
            for row in rows {
                let (topic, partition, last_offset) = row?;
                records
                    .entry(topic.clone())
                    .or_insert_with(|| TopicRecord {
                        topic,
                        partitions: HashMap::new(),
                    })
                    .partitions
                    .insert(partition, last_offset);
            }
            Ok(records)
        })
        .await
    }
}
