//! # Offset Ledger
//!
//! Tracks, per FSM instance, which offset ranges of each topic-partition
//! have been consumed.
//!
//! ## Architecture
//!
//! **Key Principle:** Producers never wait on the store.
//!
//! 1. Offset events are folded into an in-memory window (`RangeAggregator`)
//! 2. A timer drains the window and builds batch upserts (`flush`)
//! 3. Each batch is applied with an additive merge rule (`db`)
//! 4. Reads rebuild a nested FSM → topic → partition view (`view`)
//!
//! Re-applying a batch keeps `last_offset` and adds `count` again, so
//! delivery stays at-least-once: redelivery over-counts but never loses rows.
//!
//! ## Schema Reference
//!
//! All tables are created from `/sql/`:
//! - `fsm` → `FsmCreation` / `RecentRow`
//! - `offsets`, `pending_offsets` → `OffsetRow`
//! - `fsm_aliases` → `AliasBinding`
//! - `scrapes` → `TopicRecord`
//!
//! ## Module Organization
//!
//! - `types` - Core data structures (IdentityKey, RangeSummary, rows)
//! - `aggregator` - In-memory window with `add` / `drain`
//! - `flush` - Window → per-table batch upsert statements
//! - `db` - Store trait and SQLite implementation
//! - `view` - Flat rows → nested views
//! - `scheduler` - Periodic flush task
//! - `ingestion` - Event channel consumer
//! - `reconcile` - Pending alias promotion
//! - `config` - Runtime configuration

pub mod aggregator;
pub mod config;
pub mod db;
pub mod flush;
pub mod ingestion;
pub mod reconcile;
pub mod scheduler;
pub mod types;
pub mod view;

// Re-export commonly used types
pub use aggregator::{AggregationWindow, RangeAggregator};
pub use config::LedgerConfig;
pub use db::{OffsetStore, SqliteOffsetStore};
pub use flush::{build_batches, BatchTarget, FlushPlan, OffsetBatch};
pub use ingestion::{start_ingestion, OffsetEvent};
pub use reconcile::{reconcile_pending, AliasResolver, StoreAliasResolver};
pub use scheduler::{flush_once, run_flush_loop, FlushReport};
pub use types::{
    AliasBinding, FsmCreation, IdentityKey, OffsetRow, RangeSummary, RecentLimit, RecentRow,
    TopicRecord,
};
pub use view::{load_recent, reconstruct, reconstruct_recent, FsmView, PartitionView, TopicView};
