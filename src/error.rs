//! Error taxonomy for a single ingest run.
//!
//! Run-level failures are `IngestError`. Per-line failures are `RecordDecodeError`
//! and never leave the record fold; they only bump the `skipped_parse` counter.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Missing/unreadable allow-list, malformed archive filename, bad CSV header.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Corrupt archive or a frame that needs a larger window than allowed.
    #[error("decompression error: {0}")]
    Decompression(#[source] io::Error),

    /// A batch transaction failed and was rolled back.
    #[error("store write failed for a batch of {rows} rows: {source}")]
    StoreWrite {
        rows: usize,
        #[source]
        source: rusqlite::Error,
    },

    /// Schema, pragma or read failure outside a write batch.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("run cancelled")]
    Cancelled,
}

impl IngestError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// True for failures that happen before the run touches the store.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Why a single line could not be decoded into a record.
#[derive(Debug, Error)]
pub enum RecordDecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("created_utc is not an integer: {0}")]
    Timestamp(String),
}
