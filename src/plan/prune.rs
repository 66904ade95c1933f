//! Request pruning against existing archive coverage
//!
//! Each planned request is reduced to the gaps the index does not cover.
//! Before trusting the index, the day files the window touches are checked
//! on disk: coverage found in a file but absent from the index is healed
//! into the index and honored, so a rebuilt or hand-copied archive is
//! never re-downloaded.

use chrono::Duration;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::PlanResult;
use crate::archive::{day_file_path, days_spanning, scan_day_file, DayKey};
use crate::index::TimeSeriesIndex;
use crate::model::{ArchiveInterval, Request};

/// Narrow `requests` to the sub-windows not yet archived.
///
/// Gaps no longer than `min_window` are dropped as not worth a fetch, but
/// a request with no coverage at all passes through whole. The result is
/// sorted by `(start, network, station)`.
pub fn prune_requests(
    requests: &[Request],
    index: &mut TimeSeriesIndex,
    archive_root: Option<&Path>,
    min_window: Duration,
) -> PlanResult<Vec<Request>> {
    let mut pruned = Vec::new();

    for request in requests {
        let mut hits = index.intervals_overlapping(&request.nslc, request.start, request.end)?;

        if let Some(root) = archive_root {
            let on_disk: Vec<(DayKey, PathBuf)> =
                days_spanning(&request.nslc, request.start, request.end)
                    .into_iter()
                    .map(|key| {
                        let path = day_file_path(root, &key);
                        (key, path)
                    })
                    .filter(|(_, path)| path.exists())
                    .collect();
            // Day files outnumbering the indexed intervals means the index
            // is missing coverage that exists locally.
            if hits.len() < on_disk.len() {
                let healed = heal_from_disk(request, &hits, &on_disk)?;
                if !healed.is_empty() {
                    info!(
                        stream = %request.nslc,
                        count = healed.len(),
                        "recovered coverage from day files missing in index"
                    );
                    index.bulk_insert_intervals(&healed)?;
                    hits.extend(healed);
                    hits.sort_by_key(|h| h.start);
                }
            }
        }

        if hits.is_empty() {
            pruned.push(request.clone());
            continue;
        }

        // Walk the sorted coverage and emit the uncovered remainder.
        let mut cursor = request.start;
        for hit in &hits {
            if hit.start > cursor {
                push_gap(&mut pruned, request, cursor, hit.start.min(request.end), min_window);
            }
            cursor = cursor.max(hit.end);
            if cursor >= request.end {
                break;
            }
        }
        if cursor < request.end {
            push_gap(&mut pruned, request, cursor, request.end, min_window);
        }
    }

    pruned.sort_by(|a, b| {
        (a.start, &a.nslc.network, &a.nslc.station)
            .cmp(&(b.start, &b.nslc.network, &b.nslc.station))
    });
    debug!(
        planned = requests.len(),
        remaining = pruned.len(),
        "pruned requests against archive coverage"
    );
    Ok(pruned)
}

fn push_gap(
    out: &mut Vec<Request>,
    request: &Request,
    start: chrono::DateTime<chrono::Utc>,
    end: chrono::DateTime<chrono::Utc>,
    min_window: Duration,
) {
    if end - start > min_window {
        out.push(Request::new(request.nslc.clone(), start, end));
    }
}

/// Scan the day files a request touches and return on-disk coverage the
/// index does not know about. Files whose day is already fully covered by
/// a known interval are skipped without being read.
fn heal_from_disk(
    request: &Request,
    known: &[ArchiveInterval],
    on_disk: &[(DayKey, PathBuf)],
) -> PlanResult<Vec<ArchiveInterval>> {
    let mut healed = Vec::new();
    for (key, path) in on_disk {
        let day_start = key.day_start()?;
        let lo = day_start.max(request.start);
        let hi = (day_start + Duration::days(1)).min(request.end);
        if known.iter().any(|k| k.start <= lo && k.end >= hi) {
            continue;
        }
        for interval in scan_day_file(path)? {
            if interval.nslc != request.nslc
                || interval.end < request.start
                || interval.start > request.end
            {
                continue;
            }
            let covered = known
                .iter()
                .any(|k| k.start <= interval.start && k.end >= interval.end);
            if !covered {
                healed.push(interval);
            }
        }
    }
    Ok(healed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{write_day_file, DayKey};
    use crate::index::RetryPolicy;
    use crate::model::{Nslc, Trace};
    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::tempdir;

    fn bhz() -> Nslc {
        Nslc::new("IU", "ANMO", "00", "BHZ")
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    fn open_index(dir: &Path) -> TimeSeriesIndex {
        TimeSeriesIndex::open(&dir.join("index.sqlite"), &RetryPolicy::default()).unwrap()
    }

    #[test]
    fn test_partial_coverage_leaves_one_gap() {
        let dir = tempdir().unwrap();
        let mut index = open_index(dir.path());
        // Two-day request, first 12 hours already archived.
        index
            .bulk_insert_intervals(&[ArchiveInterval::new(
                bhz(),
                t0(),
                t0() + Duration::hours(12),
            )])
            .unwrap();

        let request = Request::new(bhz(), t0(), t0() + Duration::days(2));
        let gaps = prune_requests(&[request], &mut index, None, Duration::zero()).unwrap();

        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].start, t0() + Duration::hours(12));
        assert_eq!(gaps[0].end, t0() + Duration::days(2));
    }

    #[test]
    fn test_full_coverage_prunes_everything() {
        let dir = tempdir().unwrap();
        let mut index = open_index(dir.path());
        index
            .bulk_insert_intervals(&[ArchiveInterval::new(
                bhz(),
                t0() - Duration::hours(1),
                t0() + Duration::days(3),
            )])
            .unwrap();

        let request = Request::new(bhz(), t0(), t0() + Duration::days(2));
        let gaps = prune_requests(&[request], &mut index, None, Duration::zero()).unwrap();
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_interior_coverage_leaves_two_gaps_sorted() {
        let dir = tempdir().unwrap();
        let mut index = open_index(dir.path());
        index
            .bulk_insert_intervals(&[ArchiveInterval::new(
                bhz(),
                t0() + Duration::hours(6),
                t0() + Duration::hours(10),
            )])
            .unwrap();

        let request = Request::new(bhz(), t0(), t0() + Duration::hours(24));
        let gaps = prune_requests(&[request], &mut index, None, Duration::zero()).unwrap();

        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps[0].end, t0() + Duration::hours(6));
        assert_eq!(gaps[1].start, t0() + Duration::hours(10));
        assert!(gaps[0].start < gaps[1].start);
    }

    #[test]
    fn test_min_window_drops_slivers() {
        let dir = tempdir().unwrap();
        let mut index = open_index(dir.path());
        index
            .bulk_insert_intervals(&[ArchiveInterval::new(
                bhz(),
                t0() + Duration::seconds(30),
                t0() + Duration::hours(24),
            )])
            .unwrap();

        let request = Request::new(bhz(), t0(), t0() + Duration::hours(24));
        let gaps =
            prune_requests(&[request], &mut index, None, Duration::seconds(60)).unwrap();
        // The leading 30 s gap is below the threshold.
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_uncovered_short_request_passes_through() {
        let dir = tempdir().unwrap();
        let mut index = open_index(dir.path());

        // 10 s request with no coverage anywhere: shorter than min_window,
        // but it still has to go out whole.
        let request = Request::new(bhz(), t0(), t0() + Duration::seconds(10));
        let gaps = prune_requests(
            &[request.clone()],
            &mut index,
            None,
            Duration::seconds(60),
        )
        .unwrap();

        assert_eq!(gaps, vec![request]);
    }

    #[test]
    fn test_indexed_coverage_skips_day_file_reads() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("archive");
        let mut index = open_index(dir.path());
        index
            .bulk_insert_intervals(&[ArchiveInterval::new(
                bhz(),
                t0() - Duration::hours(1),
                t0() + Duration::hours(25),
            )])
            .unwrap();

        // Garbage at the day-file path: a scan of it would error out, so a
        // clean prune proves the fully indexed window was never re-read.
        let key = DayKey::for_time(&bhz(), t0());
        let path = day_file_path(&root, &key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not a day file").unwrap();

        let request = Request::new(bhz(), t0(), t0() + Duration::hours(24));
        let gaps =
            prune_requests(&[request], &mut index, Some(&root), Duration::zero()).unwrap();
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_self_heal_from_day_files() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("archive");
        let mut index = open_index(dir.path());

        // Day file on disk covering the first hour, index empty.
        let key = DayKey::for_time(&bhz(), t0());
        let trace = Trace::new(bhz(), t0(), 1.0, vec![0.0; 3600]);
        write_day_file(&day_file_path(&root, &key), &[trace]).unwrap();

        let request = Request::new(bhz(), t0(), t0() + Duration::hours(2));
        let gaps =
            prune_requests(&[request], &mut index, Some(&root), Duration::zero()).unwrap();

        assert_eq!(gaps.len(), 1);
        // Day file covers samples 0..3599 s; the gap starts where it ends.
        assert_eq!(gaps[0].start, t0() + Duration::seconds(3599));
        assert_eq!(gaps[0].end, t0() + Duration::hours(2));
        // And the index learned the coverage.
        assert_eq!(index.interval_count().unwrap(), 1);
    }
}
