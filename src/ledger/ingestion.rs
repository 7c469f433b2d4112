//! Ingestion - async channel processor for offset events
//!
//! Offset observations go to `RangeAggregator::add` and never touch the
//! store; FSM creations, alias bindings and scrapes are low-volume and are
//! written through immediately.

use super::aggregator::RangeAggregator;
use super::db::OffsetStore;
use super::types::{AliasBinding, FsmCreation};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Event delivered by the upstream consumer
///
/// JSON form is tagged by `type`:
/// `{"type":"offset","fsm_alias":"a1","topic":"t","partition":0,"offset":5}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OffsetEvent {
    Offset {
        #[serde(default)]
        fsm_id: String,
        #[serde(default)]
        fsm_alias: String,
        topic: String,
        partition: i32,
        offset: i64,
    },
    FsmCreated(FsmCreation),
    AliasBound(AliasBinding),
    Scrape {
        topic: String,
        partition: i32,
        offset: i64,
    },
}

/// Counters kept by the ingestion loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionStats {
    pub offsets: u64,
    pub fsm_created: u64,
    pub aliases: u64,
    pub scrapes: u64,
    /// Events rejected as invalid or failed at the store
    pub rejected: u64,
}

#[derive(Debug, Clone, Copy)]
enum EventKind {
    Offset,
    FsmCreated,
    AliasBound,
    Scrape,
}

impl EventKind {
    fn of(event: &OffsetEvent) -> Self {
        match event {
            OffsetEvent::Offset { .. } => EventKind::Offset,
            OffsetEvent::FsmCreated(_) => EventKind::FsmCreated,
            OffsetEvent::AliasBound(_) => EventKind::AliasBound,
            OffsetEvent::Scrape { .. } => EventKind::Scrape,
        }
    }
}

impl IngestionStats {
    fn record(&mut self, kind: EventKind) {
        match kind {
            EventKind::Offset => self.offsets += 1,
            EventKind::FsmCreated => self.fsm_created += 1,
            EventKind::AliasBound => self.aliases += 1,
            EventKind::Scrape => self.scrapes += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.offsets + self.fsm_created + self.aliases + self.scrapes + self.rejected
    }
}

/// Route one event to the aggregator or the store.
pub async fn apply_event(
    event: OffsetEvent,
    aggregator: &RangeAggregator,
    store: &dyn OffsetStore,
) -> Result<()> {
    match event {
        OffsetEvent::Offset {
            fsm_id,
            fsm_alias,
            topic,
            partition,
            offset,
        } => aggregator.add(&fsm_id, &fsm_alias, &topic, partition, offset),
        OffsetEvent::FsmCreated(creation) => store.upsert_fsm(&creation).await,
        OffsetEvent::AliasBound(binding) => {
            store.record_alias(&binding.fsm_id, &binding.fsm_alias).await
        }
        OffsetEvent::Scrape {
            topic,
            partition,
            offset,
        } => store.record_scrape(&topic, partition, offset).await,
    }
}

/// Start ingestion from the offset event channel
///
/// Runs until every sender is dropped and the channel drains. Invalid events
/// are logged and skipped.
pub async fn start_ingestion(
    mut rx: mpsc::Receiver<OffsetEvent>,
    aggregator: Arc<RangeAggregator>,
    store: Arc<dyn OffsetStore>,
) -> IngestionStats {
    log::info!("🚀 Starting offset ingestion");
    log::info!("   └─ Waiting for events...");

    let mut stats = IngestionStats::default();
    let mut window_events = 0u64;
    let mut last_log_time = Instant::now();

    while let Some(event) = rx.recv().await {
        let kind = EventKind::of(&event);

        match apply_event(event, &aggregator, store.as_ref()).await {
            Ok(()) => stats.record(kind),
            Err(e) if e.is_client_error() => {
                log::warn!("⚠️  Skipping invalid {:?} event: {}", kind, e);
                stats.rejected += 1;
            }
            Err(e) => {
                log::error!("❌ Failed to apply {:?} event: {}", kind, e);
                stats.rejected += 1;
            }
        }

        window_events += 1;
        if last_log_time.elapsed().as_secs() >= 10 {
            let per_sec = window_events as f64 / last_log_time.elapsed().as_secs_f64();
            log::info!(
                "📊 Ingestion rate: {:.1} events/sec (pending summaries: {}, channel: {})",
                per_sec,
                aggregator.len(),
                rx.len()
            );
            last_log_time = Instant::now();
            window_events = 0;
        }
    }

    log::warn!("⚠️  Event channel closed, stopping ingestion");
    log::info!(
        "✅ Ingestion stopped ({} offsets, {} fsm, {} aliases, {} scrapes, {} rejected)",
        stats.offsets,
        stats.fsm_created,
        stats.aliases,
        stats.scrapes,
        stats.rejected
    );
    stats
}
