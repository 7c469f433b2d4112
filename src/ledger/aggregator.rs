//! In-memory range aggregator
//!
//! Coalesces per-message offset events into one `RangeSummary` per
//! identity/topic/partition. The whole window lives behind a single mutex so
//! that `drain()` detaches a consistent snapshot across every key at once.
//!
//! ```text
//! producers ──add()──► Mutex<AggregationWindow> ──drain()──► FlushBatcher
//! ```
//!
//! The lock is only held for the in-memory mutation or the swap; the store
//! round trip that follows a drain happens after the lock is released.

use super::types::{AliasBinding, IdentityKey, RangeSummary};
use crate::{LedgerError, Result};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub type PartitionMap = HashMap<i32, RangeSummary>;
pub type TopicMap = HashMap<String, PartitionMap>;

/// Detached or live aggregation state: identity → topic → partition → summary
#[derive(Debug, Default)]
pub struct AggregationWindow {
    entries: HashMap<IdentityKey, TopicMap>,
    /// Aliases seen alongside a resolved id during this window
    aliases: HashSet<AliasBinding>,
}

impl AggregationWindow {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.aliases.is_empty()
    }

    /// Number of range summaries held
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .flat_map(|topics| topics.values())
            .map(|partitions| partitions.len())
            .sum()
    }

    pub fn get(&self, key: &IdentityKey, topic: &str, partition: i32) -> Option<&RangeSummary> {
        self.entries.get(key)?.get(topic)?.get(&partition)
    }

    pub fn aliases(&self) -> &HashSet<AliasBinding> {
        &self.aliases
    }

    pub fn into_parts(self) -> (HashMap<IdentityKey, TopicMap>, HashSet<AliasBinding>) {
        (self.entries, self.aliases)
    }

    fn fold(&mut self, key: IdentityKey, topic: &str, partition: i32, offset: i64, now: DateTime<Utc>) {
        let partitions = self
            .entries
            .entry(key)
            .or_default()
            .entry(topic.to_string())
            .or_default();

        match partitions.get_mut(&partition) {
            Some(summary) => summary.fold(offset, now),
            None => {
                partitions.insert(partition, RangeSummary::first(offset, now));
            }
        }
    }
}

/// Single-owner aggregation table exposing only `add` and `drain`
pub struct RangeAggregator {
    window: Mutex<AggregationWindow>,
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl RangeAggregator {
    pub fn new() -> Self {
        Self::with_clock(Box::new(Utc::now))
    }

    /// Create an aggregator with a custom clock (deterministic tests)
    pub fn with_clock(now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        Self {
            window: Mutex::new(AggregationWindow::default()),
            now_fn,
        }
    }

    /// Fold one offset event into the current window.
    ///
    /// At least one of `resolved_id` / `alias` must be non-empty. Gaps,
    /// regressions and duplicates are absorbed; only the last offset by call
    /// order is kept.
    pub fn add(
        &self,
        resolved_id: &str,
        alias: &str,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<()> {
        let key = IdentityKey::from_parts(resolved_id, alias).ok_or_else(|| {
            LedgerError::invalid("offset event carries neither an fsm id nor an alias")
        })?;
        if topic.is_empty() {
            return Err(LedgerError::invalid("offset event has an empty topic"));
        }
        if partition < 0 {
            return Err(LedgerError::invalid(format!("negative partition: {}", partition)));
        }
        if offset < 0 {
            return Err(LedgerError::invalid(format!("negative offset: {}", offset)));
        }

        let binding = (!resolved_id.is_empty() && !alias.is_empty()).then(|| AliasBinding {
            fsm_id: resolved_id.to_string(),
            fsm_alias: alias.to_string(),
        });

        let now = (self.now_fn)();
        let mut window = self.lock();
        window.fold(key, topic, partition, offset, now);
        if let Some(binding) = binding {
            window.aliases.insert(binding);
        }

        Ok(())
    }

    /// Detach the current window, leaving an empty one in its place.
    pub fn drain(&self) -> AggregationWindow {
        std::mem::take(&mut *self.lock())
    }

    /// Number of range summaries currently held
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Poisoning only means a producer panicked mid-fold; the window is still usable.
    fn lock(&self) -> MutexGuard<'_, AggregationWindow> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RangeAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn fixed_clock() -> Box<dyn Fn() -> DateTime<Utc> + Send + Sync> {
        let tick = Arc::new(AtomicI64::new(1_700_000_000_000));
        Box::new(move || {
            let ms = tick.fetch_add(1, Ordering::SeqCst);
            DateTime::<Utc>::from_timestamp_millis(ms).unwrap()
        })
    }

    fn pending(alias: &str) -> IdentityKey {
        IdentityKey::Pending(alias.to_string())
    }

    fn resolved(id: &str) -> IdentityKey {
        IdentityKey::Resolved(id.to_string())
    }

    #[test]
    fn test_add_creates_then_folds() {
        let agg = RangeAggregator::with_clock(fixed_clock());

        agg.add("", "alias1", "t1", 0, 100).unwrap();
        agg.add("", "alias1", "t1", 0, 105).unwrap();

        let window = agg.drain();
        let summary = window.get(&pending("alias1"), "t1", 0).unwrap();
        assert_eq!(summary.start_offset, 100);
        assert_eq!(summary.last_offset, 105);
        assert_eq!(summary.count, 2);
    }

    #[test]
    fn test_last_offset_follows_call_order() {
        let agg = RangeAggregator::with_clock(fixed_clock());
        let offsets = [50, 10, 70, 70, 3];
        for offset in offsets {
            agg.add("fsm-1", "", "orders", 2, offset).unwrap();
        }

        let window = agg.drain();
        let summary = window.get(&resolved("fsm-1"), "orders", 2).unwrap();
        assert_eq!(summary.count, offsets.len() as i64);
        assert_eq!(summary.start_offset, 50);
        assert_eq!(summary.last_offset, 3);
    }

    #[test]
    fn test_updated_at_moves_on_every_fold() {
        let agg = RangeAggregator::with_clock(fixed_clock());
        agg.add("fsm-1", "", "t", 0, 1).unwrap();
        let first = agg.drain();
        let t_first = first.get(&resolved("fsm-1"), "t", 0).unwrap().updated_at;

        agg.add("fsm-1", "", "t", 0, 1).unwrap();
        agg.add("fsm-1", "", "t", 0, 2).unwrap();
        let second = agg.drain();
        let t_second = second.get(&resolved("fsm-1"), "t", 0).unwrap().updated_at;
        assert!(t_second > t_first);
    }

    #[test]
    fn test_resolved_id_wins_over_alias() {
        let agg = RangeAggregator::new();
        agg.add("fsm-1", "alias-a", "t", 0, 1).unwrap();
        agg.add("fsm-1", "alias-b", "t", 0, 2).unwrap();
        agg.add("fsm-1", "", "t", 0, 3).unwrap();

        let window = agg.drain();
        assert_eq!(window.len(), 1);
        assert_eq!(window.get(&resolved("fsm-1"), "t", 0).unwrap().count, 3);

        let mut aliases: Vec<_> = window.aliases().iter().map(|b| b.fsm_alias.clone()).collect();
        aliases.sort();
        assert_eq!(aliases, vec!["alias-a", "alias-b"]);
    }

    #[test]
    fn test_rejects_invalid_events() {
        let agg = RangeAggregator::new();
        assert!(agg.add("", "", "t", 0, 1).unwrap_err().is_client_error());
        assert!(agg.add("fsm", "", "", 0, 1).unwrap_err().is_client_error());
        assert!(agg.add("fsm", "", "t", -1, 1).unwrap_err().is_client_error());
        assert!(agg.add("fsm", "", "t", 0, -5).unwrap_err().is_client_error());
        assert!(agg.is_empty());
    }

    #[test]
    fn test_drain_leaves_empty_window() {
        let agg = RangeAggregator::new();
        agg.add("fsm-1", "", "t", 0, 1).unwrap();
        agg.add("fsm-1", "", "t", 1, 1).unwrap();
        agg.add("", "alias", "t", 0, 1).unwrap();
        assert_eq!(agg.len(), 3);

        let window = agg.drain();
        assert_eq!(window.len(), 3);
        assert!(agg.is_empty());

        // Adds after the drain start a fresh window
        agg.add("fsm-1", "", "t", 0, 9).unwrap();
        let next = agg.drain();
        let summary = next.get(&resolved("fsm-1"), "t", 0).unwrap();
        assert_eq!(summary.start_offset, 9);
        assert_eq!(summary.count, 1);
        assert_eq!(window.get(&resolved("fsm-1"), "t", 0).unwrap().count, 1);
    }

    #[test]
    fn test_concurrent_adds_and_drains_lose_nothing() {
        let agg = Arc::new(RangeAggregator::new());
        let producers = 8;
        let per_producer = 2_000;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for i in 0..per_producer {
                        agg.add("fsm-1", "", "t", p % 2, i).unwrap();
                    }
                })
            })
            .collect();

        let mut total = 0i64;
        let drains = {
            let agg = agg.clone();
            std::thread::spawn(move || {
                let mut seen = 0i64;
                for _ in 0..50 {
                    let window = agg.drain();
                    let (entries, _) = window.into_parts();
                    seen += entries
                        .values()
                        .flat_map(|t| t.values())
                        .flat_map(|p| p.values())
                        .map(|s| s.count)
                        .sum::<i64>();
                    std::thread::yield_now();
                }
                seen
            })
        };

        for h in handles {
            h.join().unwrap();
        }
        total += drains.join().unwrap();

        let (rest, _) = agg.drain().into_parts();
        total += rest
            .values()
            .flat_map(|t| t.values())
            .flat_map(|p| p.values())
            .map(|s| s.count)
            .sum::<i64>();

        assert_eq!(total, (producers as i64) * per_producer);
    }
}
