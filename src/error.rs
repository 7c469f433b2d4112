//! Ledger error types
//!
//! Every fallible operation in the crate returns [`Result<T>`], aliased to
//! `Result<T, LedgerError>`, so store, flush and API code propagate with `?`.
//!
//! Errors split into two groups:
//! - client input errors (`InvalidInput`): rejected before they reach the
//!   aggregator or the store
//! - server-side errors (everything else): reported upward unchanged, no retry

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store connection lock poisoned")]
    LockPoisoned,

    #[error("Store task failed: {0}")]
    StoreTask(#[from] tokio::task::JoinError),

    #[error("Flush timed out after {0:?}")]
    FlushTimeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event channel closed")]
    ChannelClosed,

    #[error("Gave up after {0} retry attempts")]
    RetriesExhausted(u32),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        LedgerError::InvalidInput(msg.into())
    }

    /// True for errors caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, LedgerError::InvalidInput(_))
    }
}
