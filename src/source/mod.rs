//! JSONL event source
//!
//! Tails a file of `OffsetEvent` lines and forwards them into the ingestion
//! channel. The file may not exist yet when the runtime starts; opening is
//! retried with exponential backoff.

pub mod backoff;
pub mod reader;

pub use backoff::ExponentialBackoff;
pub use reader::TailReader;

use crate::ledger::ingestion::OffsetEvent;
use crate::{LedgerError, Result};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Counters for one event source run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub forwarded: u64,
    pub malformed: u64,
}

/// Default open backoff: 1s doubling to 30s, 10 attempts
pub fn default_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30), 10)
}

async fn open_with_backoff(reader: &mut TailReader, backoff: &mut ExponentialBackoff) -> Result<()> {
    loop {
        match reader.start().await {
            Ok(()) => {
                backoff.reset();
                return Ok(());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("⚠️  Event file not found yet: {}", reader.path().display());
                backoff.sleep().await?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Parse one JSONL line into an event. Invalid UTF-8 is a parse error.
pub fn parse_event(line: &[u8]) -> Result<OffsetEvent> {
    Ok(serde_json::from_slice(line)?)
}

/// Tail `reader` and forward each parsed event into `tx`.
///
/// Returns when `shutdown` fires or every receiver is gone. Malformed lines,
/// including ones that are not valid UTF-8, are logged and skipped.
pub async fn run_event_source(
    mut reader: TailReader,
    mut backoff: ExponentialBackoff,
    tx: mpsc::Sender<OffsetEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<SourceStats> {
    tokio::select! {
        opened = open_with_backoff(&mut reader, &mut backoff) => opened?,
        _ = shutdown.changed() => return Ok(SourceStats::default()),
    }

    let mut stats = SourceStats::default();

    loop {
        let line = tokio::select! {
            line = reader.read_line() => line?,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };
        let Some(line) = line else { continue };

        match parse_event(&line) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    log::warn!("⚠️  Ingestion channel closed, stopping event source");
                    return Err(LedgerError::ChannelClosed);
                }
                stats.forwarded += 1;
            }
            Err(e) => {
                log::warn!("⚠️  Skipping malformed event line: {}", e);
                stats.malformed += 1;
            }
        }
    }

    log::info!(
        "✅ Event source stopped ({} forwarded, {} malformed)",
        stats.forwarded,
        stats.malformed
    );
    Ok(stats)
}
