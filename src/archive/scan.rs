//! Bulk archive rescans and local read-back
//!
//! The rescan walks the archive tree, recovers the covered interval of each
//! recognized day file, and rebuilds the availability index from what is
//! actually on disk. Read-back serves a time window of one stream straight
//! from the day files.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use tracing::{debug, info, warn};

use super::dayfile::{merge_traces, read_day_file};
use super::layout::{day_file_path, days_spanning, parse_day_file_name};
use super::{ArchiveError, ArchiveResult};
use crate::index::TimeSeriesIndex;
use crate::model::{ArchiveInterval, Nslc, Trace};

/// Options for a bulk rescan.
#[derive(Debug, Clone)]
pub struct RescanOptions {
    /// fnmatch-style filename patterns (`?` one char, `*` any run); a file
    /// matching any pattern is scanned. Empty means every file.
    pub patterns: Vec<String>,
    /// Only scan files modified after this instant.
    pub newer_than: Option<DateTime<Utc>>,
    /// Worker threads for the scan; 1 means sequential.
    pub workers: usize,
    /// Gap tolerance for the compaction pass that closes the rescan.
    pub gap_tolerance: Duration,
}

impl Default for RescanOptions {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            newer_than: None,
            workers: 4,
            gap_tolerance: Duration::seconds(60),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescanReport {
    pub files_seen: usize,
    pub files_scanned: usize,
    pub files_failed: usize,
    pub intervals_added: usize,
}

/// Translate an fnmatch-style pattern into an anchored regex.
pub(crate) fn wildcard_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out)
}

/// Recover the intervals a day file actually covers.
///
/// The stream identity comes from the filename; the covered spans come from
/// the merged traces inside the file.
pub fn scan_day_file(path: &Path) -> ArchiveResult<Vec<ArchiveInterval>> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ArchiveError::BadFileName(path.display().to_string()))?;
    let key = parse_day_file_name(name)?;

    let traces = read_day_file(path)?;
    let intervals = merge_traces(&traces)
        .into_iter()
        .filter(|t| !t.is_empty())
        .map(|t| ArchiveInterval::new(key.nslc.clone(), t.start, t.end()))
        .collect();
    Ok(intervals)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn modified_after(path: &Path, cutoff: DateTime<Utc>) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    let Ok(mtime) = meta.modified() else {
        return false;
    };
    let Ok(age) = mtime.duration_since(SystemTime::UNIX_EPOCH) else {
        return false;
    };
    (age.as_secs() as i64) >= cutoff.timestamp()
}

fn scan_batch(files: &[PathBuf]) -> (Vec<ArchiveInterval>, usize) {
    let mut intervals = Vec::new();
    let mut failed = 0;
    for path in files {
        match scan_day_file(path) {
            Ok(found) => intervals.extend(found),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable day file");
                failed += 1;
            }
        }
    }
    (intervals, failed)
}

/// Walk the archive root and rebuild index coverage from the day files,
/// finishing with a compaction pass.
pub fn rescan_archive(
    root: &Path,
    index: &mut TimeSeriesIndex,
    options: &RescanOptions,
) -> ArchiveResult<RescanReport> {
    let mut all_files = Vec::new();
    collect_files(root, &mut all_files)?;
    let files_seen = all_files.len();

    let mut regexes = Vec::with_capacity(options.patterns.len());
    for pattern in &options.patterns {
        regexes.push(
            wildcard_to_regex(pattern)
                .map_err(|e| ArchiveError::Codec(format!("bad pattern {:?}: {}", pattern, e)))?,
        );
    }

    let selected: Vec<PathBuf> = all_files
        .into_iter()
        .filter(|path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            let matches =
                regexes.is_empty() || regexes.iter().any(|re| re.is_match(name));
            let fresh = options
                .newer_than
                .map_or(true, |cutoff| modified_after(path, cutoff));
            matches && fresh
        })
        .collect();
    debug!(
        seen = files_seen,
        selected = selected.len(),
        "archive walk complete"
    );

    let workers = options.workers.max(1).min(selected.len().max(1));
    let (intervals, files_failed) = if workers <= 1 {
        scan_batch(&selected)
    } else {
        let chunk_size = selected.len().div_ceil(workers);
        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            let mut intervals = Vec::new();
            let mut failed = 0;
            for chunk in selected.chunks(chunk_size) {
                match std::thread::Builder::new().spawn_scoped(scope, move || scan_batch(chunk)) {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        // Worker spawn can fail under resource pressure;
                        // the chunk is scanned on this thread instead.
                        warn!(error = %err, "scan worker unavailable, scanning chunk inline");
                        let (found, bad) = scan_batch(chunk);
                        intervals.extend(found);
                        failed += bad;
                    }
                }
            }
            for handle in handles {
                match handle.join() {
                    Ok((found, bad)) => {
                        intervals.extend(found);
                        failed += bad;
                    }
                    Err(_) => failed += chunk_size,
                }
            }
            (intervals, failed)
        })
    };

    let intervals_added = index.bulk_insert_intervals(&intervals)?;
    index.compact(options.gap_tolerance)?;

    let report = RescanReport {
        files_seen,
        files_scanned: selected.len() - files_failed,
        files_failed,
        intervals_added,
    };
    info!(
        scanned = report.files_scanned,
        failed = report.files_failed,
        intervals = report.intervals_added,
        "archive rescan complete"
    );
    Ok(report)
}

/// Read one stream's samples for a time window straight from the archive.
///
/// Day files that do not exist contribute nothing; an entirely empty result
/// is not an error.
pub fn read_local_window(
    root: &Path,
    nslc: &Nslc,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> ArchiveResult<Vec<Trace>> {
    let mut collected = Vec::new();
    // A window ending exactly on midnight still has its last sample in the
    // next day's file.
    for key in days_spanning(nslc, start, end + Duration::microseconds(1)) {
        let path = day_file_path(root, &key);
        if !path.exists() {
            continue;
        }
        for trace in read_day_file(&path)? {
            if trace.nslc != *nslc {
                continue;
            }
            if let Some(sliced) = trace.slice(start, end) {
                collected.push(sliced);
            }
        }
    }
    Ok(merge_traces(&collected))
}
