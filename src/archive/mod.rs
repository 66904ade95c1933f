//! Day-partitioned waveform archive
//!
//! Data lives under a year/network/station/channel directory tree with one
//! file per stream per UTC day. Submodules:
//! - `layout`: path and filename conventions
//! - `dayfile`: the binary day-file codec and trace merge
//! - `writer`: download execution and read-merge-rewrite
//! - `scan`: bulk rescans and local read-back

mod dayfile;
mod layout;
mod scan;
mod writer;

pub use dayfile::{merge_traces, read_day_file, write_day_file};
pub use layout::{day_bounds, day_file_name, day_file_path, days_spanning, parse_day_file_name, DayKey};
pub use scan::{read_local_window, rescan_archive, scan_day_file, RescanOptions, RescanReport};
pub(crate) use scan::wildcard_to_regex;
pub use writer::{ArchiveWriter, WriteReport};

use thiserror::Error;

use crate::index::IndexError;

/// Errors from archive reads and writes.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A day file failed structural validation.
    #[error("corrupt day file {path}: {detail}")]
    Corrupt { path: String, detail: String },

    #[error("codec error: {0}")]
    Codec(String),

    /// A filename under the archive root does not follow the day-file
    /// naming convention.
    #[error("unrecognized archive file name: {0}")]
    BadFileName(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Source(#[from] crate::sources::SourceError),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
