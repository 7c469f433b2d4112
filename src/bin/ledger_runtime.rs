//! Ledger Runtime
//!
//! This binary wires the offset ledger together:
//! - Opens the SQLite store (PRAGMAs + schema)
//! - Spawns ingestion, the flush scheduler and the alias reconciler
//! - Tails a JSONL event file when `LEDGER_EVENTS_PATH` is set
//! - Serves the read API until CTRL+C, then flushes once more
//!
//! Usage:
//!   cargo run --release --bin ledger_runtime
//!
//! Environment variables: see `LedgerConfig::from_env`.

use dotenv::dotenv;
use log::{error, info, warn};
use offset_ledger::api::{create_router, serve, AppState};
use offset_ledger::ledger::{
    config::LedgerConfig,
    db::{OffsetStore, SqliteOffsetStore},
    ingestion::{start_ingestion, OffsetEvent},
    reconcile::{run_reconcile_loop, AliasResolver, StoreAliasResolver},
    scheduler::run_flush_loop,
    RangeAggregator,
};
use offset_ledger::source::{default_backoff, run_event_source, TailReader};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Ledger Runtime");

    let config = LedgerConfig::from_env()?;
    info!("   ├─ Database: {}", config.db_path.display());
    info!("   ├─ Read API: {}", config.http_addr);
    info!("   ├─ Flush interval: {:?} (timeout {:?})", config.flush_interval, config.flush_timeout);
    info!("   ├─ Reconcile interval: {:?}", config.reconcile_interval);
    info!("   ├─ Channel buffer: {} events", config.event_buffer);
    match &config.events_path {
        Some(path) => info!("   └─ Event source: {}", path.display()),
        None => info!("   └─ Event source: none (LEDGER_EVENTS_PATH unset)"),
    }

    // Initialize database
    info!("🔧 Initializing database...");
    let sqlite = SqliteOffsetStore::open(&config.db_path)?;
    let store: Arc<dyn OffsetStore> = Arc::new(sqlite);

    let scrapes = store.load_scrapes().await?;
    info!("📊 Loaded scrape records for {} topics", scrapes.len());

    let aggregator = Arc::new(RangeAggregator::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (flush_stop_tx, flush_stop_rx) = watch::channel(false);
    let (tx, rx) = mpsc::channel::<OffsetEvent>(config.event_buffer);

    info!("🚀 Spawning background tasks...");

    let ingestion = tokio::spawn(start_ingestion(rx, aggregator.clone(), store.clone()));

    let flusher = tokio::spawn(run_flush_loop(
        aggregator.clone(),
        store.clone(),
        config.flush_interval,
        config.flush_timeout,
        flush_stop_rx,
    ));

    let resolver: Arc<dyn AliasResolver> = Arc::new(StoreAliasResolver::new(store.clone()));
    let reconciler = tokio::spawn(run_reconcile_loop(
        store.clone(),
        resolver,
        config.reconcile_interval,
        shutdown_rx.clone(),
    ));

    let source = config.events_path.clone().map(|path| {
        let reader = TailReader::new(path);
        let source_tx = tx.clone();
        let source_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = run_event_source(reader, default_backoff(), source_tx, source_shutdown).await {
                error!("❌ Event source failed: {}", e);
            }
        })
    });
    // Only the event source keeps the channel open
    drop(tx);

    info!("✅ All background tasks running");
    info!("🔄 Press CTRL+C to shutdown gracefully");

    let router = create_router(AppState { store: store.clone() });
    let mut api_shutdown = shutdown_rx.clone();
    let api = tokio::spawn(serve(router, config.http_addr, async move {
        let _ = api_shutdown.wait_for(|stop| *stop).await;
    }));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
        Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
    }

    let _ = shutdown_tx.send(true);

    // Source first so ingestion sees the channel close, then the final flush
    if let Some(source) = source {
        let _ = source.await;
    }
    if let Ok(stats) = ingestion.await {
        info!("📊 Ingested {} events", stats.total());
    }
    let _ = flush_stop_tx.send(true);
    if flusher.await.is_err() {
        warn!("⚠️  Flush scheduler task panicked");
    }
    let _ = reconciler.await;

    match api.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("❌ Read API failed: {}", e),
        Err(e) => error!("❌ Read API task panicked: {}", e),
    }

    info!("✅ Ledger runtime stopped");
    Ok(())
}
