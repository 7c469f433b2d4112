//! Ledger configuration from environment variables

use crate::{LedgerError, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the ledger runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Path to SQLite database file
    pub db_path: PathBuf,

    /// Listen address for the read API
    pub http_addr: SocketAddr,

    /// Aggregation window length
    pub flush_interval: Duration,

    /// Upper bound on one flush submission
    pub flush_timeout: Duration,

    /// Pending alias reconciliation interval
    pub reconcile_interval: Duration,

    /// Channel buffer size for event ingestion
    pub event_buffer: usize,

    /// JSONL file of offset events to tail; no event source when unset
    pub events_path: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/ledger.db"),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            flush_interval: Duration::from_millis(5_000),
            flush_timeout: Duration::from_millis(3_000),
            reconcile_interval: Duration::from_millis(60_000),
            event_buffer: 10_000,
            events_path: None,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `LEDGER_DB_PATH` (default: data/ledger.db)
    /// - `LEDGER_HTTP_ADDR` (default: 0.0.0.0:8000)
    /// - `LEDGER_FLUSH_INTERVAL_MS` (default: 5000)
    /// - `LEDGER_FLUSH_TIMEOUT_MS` (default: 3000)
    /// - `LEDGER_RECONCILE_INTERVAL_MS` (default: 60000)
    /// - `LEDGER_EVENT_BUFFER` (default: 10000)
    /// - `LEDGER_EVENTS_PATH` (optional)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            db_path: value("LEDGER_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),

            http_addr: parse_or(value("LEDGER_HTTP_ADDR"), "LEDGER_HTTP_ADDR", defaults.http_addr),

            flush_interval: parse_millis(
                value("LEDGER_FLUSH_INTERVAL_MS"),
                "LEDGER_FLUSH_INTERVAL_MS",
                defaults.flush_interval,
            )?,

            flush_timeout: parse_millis(
                value("LEDGER_FLUSH_TIMEOUT_MS"),
                "LEDGER_FLUSH_TIMEOUT_MS",
                defaults.flush_timeout,
            )?,

            reconcile_interval: parse_millis(
                value("LEDGER_RECONCILE_INTERVAL_MS"),
                "LEDGER_RECONCILE_INTERVAL_MS",
                defaults.reconcile_interval,
            )?,

            event_buffer: parse_or(value("LEDGER_EVENT_BUFFER"), "LEDGER_EVENT_BUFFER", defaults.event_buffer),

            events_path: value("LEDGER_EVENTS_PATH").map(PathBuf::from),
        };

        if config.event_buffer == 0 {
            return Err(LedgerError::Config("LEDGER_EVENT_BUFFER must be positive".to_string()));
        }

        Ok(config)
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> T {
    match raw {
        None => default,
        Some(s) => s.trim().parse().unwrap_or_else(|_| {
            log::warn!("⚠️  Ignoring unparseable {}={:?}, using default", key, s);
            default
        }),
    }
}

fn parse_millis(raw: Option<String>, key: &str, default: Duration) -> Result<Duration> {
    let ms: u64 = parse_or(raw, key, default.as_millis() as u64);
    if ms == 0 {
        return Err(LedgerError::Config(format!("{} must be greater than zero", key)));
    }
    Ok(Duration::from_millis(ms))
}
