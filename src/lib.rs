//! Offset bookkeeping for a stream-consumption pipeline
//!
//! - `ledger` - aggregation, batched persistence and read-side views
//! - `source` - JSONL event source feeding the ingestion channel
//! - `api` - HTTP read API

pub mod api;
pub mod error;
pub mod ledger;
pub mod source;
pub mod sqlite_pragma;

pub use error::{LedgerError, Result};
