//! Error types for Stratum.

use stratum_types::{Quark, StateValueTypeError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StratumError>;

#[derive(Debug, Error)]
pub enum StratumError {
    /// A query time or an inserted interval falls outside the backend's bounds.
    #[error("time range error: {0}")]
    TimeRange(String),

    /// A singular query found nothing for the attribute at that time.
    #[error("no interval for attribute {quark} at time {time}")]
    AttributeNotFound { quark: Quark, time: i64 },

    /// The backend was disposed before or during the query.
    #[error("backend has been disposed")]
    Disposed,

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    #[error("provider version mismatch: expected {expected}, found {found}")]
    ProviderVersionMismatch { expected: u32, found: u32 },

    #[error("history writer thread failed: {0}")]
    WriterThread(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    ValueType(#[from] StateValueTypeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StratumError {
    pub(crate) fn time_out_of_range(time: i64, start: i64, end: i64) -> Self {
        StratumError::TimeRange(format!(
            "time {} is outside the history range [{}, {}]",
            time, start, end
        ))
    }

    /// Validate the bounds of an interval about to be inserted.
    pub(crate) fn check_insertion(start: i64, end: i64, history_start: i64) -> Result<()> {
        if start > end {
            return Err(StratumError::TimeRange(format!(
                "interval start {} is after its end {}",
                start, end
            )));
        }
        if start < history_start {
            return Err(StratumError::TimeRange(format!(
                "interval start {} precedes the history start {}",
                start, history_start
            )));
        }
        Ok(())
    }
}
