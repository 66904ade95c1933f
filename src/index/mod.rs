//! Availability index backed by SQLite
//!
//! Tracks which spans of which streams are already on disk
//! (`archive_data`) and caches travel-time computations per
//! (event, station) pair (`arrival_data`). Submodules:
//! - `retry`: connect-with-retry against a busy database file
//! - `store`: the [`TimeSeriesIndex`] store itself
//! - `compact`: interval merge pass over `archive_data`

mod compact;
mod retry;
mod store;

pub use compact::CompactionStats;
pub use retry::{connect_with_retry, RetryPolicy};
pub use store::{QueryOutcome, TimeSeriesIndex};

use thiserror::Error;

/// Errors from index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The database stayed locked through every retry attempt.
    #[error("index unavailable after {attempts} attempts: {source}")]
    Unavailable {
        attempts: u32,
        source: rusqlite::Error,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Ad-hoc query touched a table outside the index schema.
    #[error("unknown table: {0}")]
    InvalidTable(String),

    /// A stored timestamp failed to parse.
    #[error("invalid stored time: {0}")]
    InvalidTime(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type IndexResult<T> = Result<T, IndexError>;
