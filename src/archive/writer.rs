//! Download execution: fetch, partition into days, read-merge-rewrite
//!
//! One [`ArchiveWriter::execute`] call services one planned request. The
//! fetched traces are clamped to the request window, split on UTC day
//! boundaries, merged into any existing day files, and the resulting
//! coverage is recorded in the index. A failure writing one day never
//! blocks the other days of the same request.

use std::path::{Path, PathBuf};

use chrono::Duration;
use tracing::{debug, info, warn};

use super::dayfile::{merge_traces, read_day_file, write_day_file};
use super::layout::{day_bounds, day_file_path, days_spanning, DayKey};
use super::{ArchiveError, ArchiveResult};
use crate::index::TimeSeriesIndex;
use crate::model::{ArchiveInterval, Request, Trace};
use crate::sources::{ClientTable, SourceError};

/// Longest station field sent to a source in one call. Longer comma-joined
/// lists are split into multiple fetches.
const MAX_STATION_FIELD: usize = 24;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub traces_fetched: usize,
    pub days_written: usize,
    pub days_failed: usize,
    /// Fetch sub-calls that failed outright. Whatever the other sub-calls
    /// returned is still archived.
    pub fetch_failures: usize,
    /// The source held nothing for this window. Benign.
    pub no_data: bool,
}

pub struct ArchiveWriter {
    root: PathBuf,
}

impl ArchiveWriter {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fetch one request and fold the result into the archive and index.
    pub fn execute(
        &self,
        request: &Request,
        clients: &ClientTable,
        index: &mut TimeSeriesIndex,
    ) -> ArchiveResult<WriteReport> {
        let first_station = request
            .nslc
            .station
            .split(',')
            .next()
            .unwrap_or("")
            .to_string();
        let client = clients.resolve(&request.nslc.network, &first_station);

        let mut fetched: Vec<Trace> = Vec::new();
        let mut fetch_failures = 0;
        for station_field in split_station_list(&request.nslc.station) {
            match client.fetch(
                &request.nslc.network,
                &station_field,
                &request.nslc.location,
                &request.nslc.channel,
                request.start,
                request.end,
            ) {
                Ok(traces) => {
                    fetched.extend(traces);
                }
                Err(SourceError::NoData) => {
                    debug!(
                        stream = %request.nslc,
                        start = %request.start,
                        end = %request.end,
                        "source has no data for window"
                    );
                }
                Err(err) => {
                    // One bad station field must not throw away what the
                    // other fields already returned.
                    warn!(
                        stream = %request.nslc,
                        stations = %station_field,
                        start = %request.start,
                        end = %request.end,
                        error = %err,
                        "fetch failed"
                    );
                    fetch_failures += 1;
                }
            }
        }

        if fetched.is_empty() {
            return Ok(WriteReport {
                fetch_failures,
                no_data: fetch_failures == 0,
                ..Default::default()
            });
        }

        // Clamp to the requested window before partitioning.
        let clamped: Vec<Trace> = fetched
            .iter()
            .filter_map(|t| t.slice(request.start, request.end))
            .collect();
        let traces_fetched = clamped.len();

        let mut report = WriteReport {
            traces_fetched,
            fetch_failures,
            ..Default::default()
        };
        let mut intervals: Vec<ArchiveInterval> = Vec::new();

        for (key, day_traces) in partition_by_day(&clamped) {
            match self.write_day(&key, &day_traces) {
                Ok(day_intervals) => {
                    report.days_written += 1;
                    intervals.extend(day_intervals);
                }
                Err(err) => {
                    warn!(
                        day = %super::layout::day_file_name(&key),
                        error = %err,
                        "day write failed"
                    );
                    report.days_failed += 1;
                }
            }
        }

        index.bulk_insert_intervals(&intervals)?;
        info!(
            stream = %request.nslc,
            traces = report.traces_fetched,
            days = report.days_written,
            failed = report.days_failed,
            "request archived"
        );
        Ok(report)
    }

    /// Merge `day_traces` into the existing day file and rewrite it,
    /// returning the coverage now present in the file.
    fn write_day(&self, key: &DayKey, day_traces: &[Trace]) -> ArchiveResult<Vec<ArchiveInterval>> {
        let path = day_file_path(&self.root, key);
        let mut combined = if path.exists() {
            read_day_file(&path)?
        } else {
            Vec::new()
        };
        // New traces come last so they win on overlap.
        combined.extend(day_traces.iter().cloned());
        let merged = merge_traces(&combined);
        write_day_file(&path, &merged)?;

        Ok(merged
            .iter()
            .filter(|t| t.nslc == key.nslc && !t.is_empty())
            .map(|t| ArchiveInterval::new(t.nslc.clone(), t.start, t.end()))
            .collect())
    }
}

/// Split a comma-joined station list so each piece stays under the field
/// limit. Single stations pass through untouched.
fn split_station_list(stations: &str) -> Vec<String> {
    if stations.len() <= MAX_STATION_FIELD {
        return vec![stations.to_string()];
    }
    let mut pieces = Vec::new();
    let mut current = String::new();
    for station in stations.split(',') {
        if !current.is_empty() && current.len() + 1 + station.len() > MAX_STATION_FIELD {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(',');
        }
        current.push_str(station);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Split traces on UTC day boundaries. A sample landing exactly on
/// midnight belongs to the next day's file, and a trace starting within
/// one sample period of the next midnight carries its head into the next
/// day's file rather than leaving a sliver in the earlier one.
fn partition_by_day(traces: &[Trace]) -> Vec<(DayKey, Vec<Trace>)> {
    let mut by_day: std::collections::BTreeMap<(i32, u32, String), (DayKey, Vec<Trace>)> =
        std::collections::BTreeMap::new();
    for trace in traces {
        if trace.is_empty() {
            continue;
        }
        let (_, first_day_end) = day_bounds(trace.start);
        let snap_head = first_day_end - trace.start < trace.delta();
        // Nudge the span end past the last sample so a sample sitting
        // exactly on midnight yields the next day's key.
        let span_end = trace.end() + Duration::microseconds(1);
        for key in days_spanning(&trace.nslc, trace.start, span_end) {
            let Ok(day_start) = key.day_start() else {
                continue;
            };
            let day_end = day_start + Duration::days(1);
            // Inclusive window ending one microsecond before midnight, so
            // the midnight sample falls into the next day's key.
            let Some(piece) = trace.slice(day_start, day_end - Duration::microseconds(1)) else {
                continue;
            };
            let key = if snap_head && day_start <= trace.start && trace.start < day_end {
                DayKey::for_time(&trace.nslc, day_end)
            } else {
                key
            };
            by_day
                .entry((key.year, key.doy, key.nslc.label()))
                .or_insert_with(|| (key.clone(), Vec::new()))
                .1
                .push(piece);
        }
    }
    by_day.into_values().collect()
}
