//! Pending alias reconciliation
//!
//! Rows recorded under an alias stay in `pending_offsets` until some
//! `AliasResolver` knows the identity behind it. A reconciliation pass then
//! promotes them into `offsets` using the same merge rule as a flush.

use super::db::OffsetStore;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Maps a pre-resolution alias to its canonical identity
#[async_trait]
pub trait AliasResolver: Send + Sync {
    async fn resolve(&self, fsm_alias: &str) -> Result<Option<String>>;
}

/// Resolves aliases through the store's recorded alias bindings
pub struct StoreAliasResolver {
    store: Arc<dyn OffsetStore>,
}

impl StoreAliasResolver {
    pub fn new(store: Arc<dyn OffsetStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AliasResolver for StoreAliasResolver {
    async fn resolve(&self, fsm_alias: &str) -> Result<Option<String>> {
        self.store.lookup_alias(fsm_alias).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Aliases that had pending rows at the start of the pass
    pub scanned: usize,
    /// Aliases whose rows were promoted
    pub resolved: usize,
    /// Rows moved into `offsets`
    pub rows_moved: usize,
}

/// Promote every pending alias the resolver can resolve.
///
/// A failure on one alias is logged and the pass moves on; only failing to
/// list the pending aliases aborts it.
pub async fn reconcile_pending(
    store: &dyn OffsetStore,
    resolver: &dyn AliasResolver,
) -> Result<ReconcileReport> {
    let aliases = store.pending_aliases().await?;
    let mut report = ReconcileReport {
        scanned: aliases.len(),
        ..Default::default()
    };

    for alias in aliases {
        let fsm_id = match resolver.resolve(&alias).await {
            Ok(Some(fsm_id)) if !fsm_id.is_empty() => fsm_id,
            Ok(_) => continue,
            Err(e) => {
                log::warn!("⚠️  Could not resolve alias {}: {}", alias, e);
                continue;
            }
        };

        match store.promote_pending(&alias, &fsm_id).await {
            Ok(moved) => {
                log::debug!("🔗 Promoted {} pending rows: {} → {}", moved, alias, fsm_id);
                report.resolved += 1;
                report.rows_moved += moved;
            }
            Err(e) => {
                log::error!("❌ Failed to promote pending rows for {}: {}", alias, e);
            }
        }
    }

    Ok(report)
}

/// Reconciliation task
///
/// Runs a pass every `reconcile_interval` until `shutdown` fires.
pub async fn run_reconcile_loop(
    store: Arc<dyn OffsetStore>,
    resolver: Arc<dyn AliasResolver>,
    reconcile_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    log::info!("🔗 Starting alias reconciler (interval: {:?})", reconcile_interval);

    let mut timer = interval(reconcile_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                match reconcile_pending(store.as_ref(), resolver.as_ref()).await {
                    Ok(report) if report.resolved > 0 => {
                        log::info!(
                            "✅ Reconciled {}/{} pending aliases ({} rows)",
                            report.resolved,
                            report.scanned,
                            report.rows_moved
                        );
                    }
                    Ok(_) => {}
                    Err(e) => log::error!("❌ Reconciliation pass failed: {}", e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    log::info!("🛑 Alias reconciler stopped");
}
