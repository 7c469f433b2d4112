//! Periodic flush of the aggregation window into the store
//!
//! Each cycle: `drain()` → `build_batches()` → one upsert per batch → alias
//! bindings. The whole submission is bounded by the flush timeout. A failed
//! or timed-out cycle drops its detached window; delivery is at-least-once
//! upstream, never retried here.

use super::aggregator::RangeAggregator;
use super::db::OffsetStore;
use super::flush::{build_batches, BatchTarget, FlushPlan};
use crate::{LedgerError, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Outcome of one flush cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub resolved_rows: usize,
    pub pending_rows: usize,
    /// Offset events represented by the flushed rows
    pub events: i64,
    /// Newly recorded alias bindings
    pub aliases: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.resolved_rows == 0 && self.pending_rows == 0 && self.aliases == 0
    }
}

/// Drain the aggregator and persist the detached window once.
pub async fn flush_once(
    aggregator: &RangeAggregator,
    store: &dyn OffsetStore,
    flush_timeout: Duration,
) -> Result<FlushReport> {
    let plan = build_batches(aggregator.drain());
    if plan.is_empty() {
        return Ok(FlushReport::default());
    }

    tokio::time::timeout(flush_timeout, submit(store, &plan))
        .await
        .map_err(|_| LedgerError::FlushTimeout(flush_timeout))?
}

async fn submit(store: &dyn OffsetStore, plan: &FlushPlan) -> Result<FlushReport> {
    let mut report = FlushReport::default();

    for batch in &plan.batches {
        let written = store.upsert_offset_batch(batch).await?;
        match batch.target {
            BatchTarget::Resolved => report.resolved_rows += written,
            BatchTarget::Pending => report.pending_rows += written,
        }
        report.events += batch.event_count();
    }

    report.aliases = store.record_aliases(&plan.aliases).await?;
    Ok(report)
}

async fn flush_and_log(aggregator: &RangeAggregator, store: &dyn OffsetStore, flush_timeout: Duration) {
    let started = Instant::now();
    match flush_once(aggregator, store, flush_timeout).await {
        Ok(report) if report.is_empty() => {}
        Ok(report) => {
            log::debug!(
                "✅ Flushed {} resolved + {} pending rows ({} events, {} new aliases) in {:?}",
                report.resolved_rows,
                report.pending_rows,
                report.events,
                report.aliases,
                started.elapsed()
            );
        }
        Err(e) => {
            log::error!("❌ Flush failed, window dropped: {}", e);
        }
    }
}

/// Flush scheduler task
///
/// Ticks every `flush_interval` until `shutdown` flips to true (or its
/// sender is dropped), then performs one final flush.
pub async fn run_flush_loop(
    aggregator: Arc<RangeAggregator>,
    store: Arc<dyn OffsetStore>,
    flush_interval: Duration,
    flush_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    log::info!(
        "⏰ Starting flush scheduler (interval: {:?}, timeout: {:?})",
        flush_interval,
        flush_timeout
    );

    let mut timer = interval(flush_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                flush_and_log(&aggregator, store.as_ref(), flush_timeout).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    log::info!("🛑 Flush scheduler stopping, final flush");
    flush_and_log(&aggregator, store.as_ref(), flush_timeout).await;
}
