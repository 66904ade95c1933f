//! Interval compaction over `archive_data`
//!
//! Repeated syncs leave many abutting rows per stream. The compaction pass
//! merges rows whose gap is within a tolerance, keeping one representative
//! row per merged run and deleting the absorbed rows.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use tracing::info;

use super::store::{fmt_time, parse_time, TimeSeriesIndex};
use super::IndexResult;

/// Absorbed-row deletes are issued in batches of this size.
const DELETE_CHUNK: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Rows scanned.
    pub rows_examined: usize,
    /// Rows absorbed into a neighbor and deleted.
    pub rows_removed: usize,
    /// Rows remaining after the pass.
    pub intervals_out: usize,
}

struct Row {
    id: i64,
    stream: (String, String, String, String),
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeSeriesIndex {
    /// Merge adjacent rows per stream whose inter-row gap is at most
    /// `gap_tolerance`.
    ///
    /// The scan is ordered in SQL by stream then start time, so a single
    /// forward pass sees every mergeable neighbor pair. The pass is
    /// idempotent: a second run with the same tolerance changes nothing.
    pub fn compact(&mut self, gap_tolerance: Duration) -> IndexResult<CompactionStats> {
        let rows = self.load_ordered_rows()?;
        let examined = rows.len();

        // (kept row id, merged end) for rows whose end grew, plus ids of
        // rows absorbed into a predecessor.
        let mut extended: Vec<(i64, DateTime<Utc>)> = Vec::new();
        let mut absorbed: Vec<i64> = Vec::new();

        let mut rows = rows.into_iter();
        let mut current = match rows.next() {
            Some(first) => first,
            None => {
                return Ok(CompactionStats {
                    rows_examined: 0,
                    rows_removed: 0,
                    intervals_out: 0,
                })
            }
        };
        let mut current_grew = false;

        for row in rows {
            let same_stream = row.stream == current.stream;
            if same_stream && row.start <= current.end + gap_tolerance {
                absorbed.push(row.id);
                if row.end > current.end {
                    current.end = row.end;
                    current_grew = true;
                }
            } else {
                if current_grew {
                    extended.push((current.id, current.end));
                }
                current = row;
                current_grew = false;
            }
        }
        if current_grew {
            extended.push((current.id, current.end));
        }

        let removed = absorbed.len();
        self.apply_merge(&extended, &absorbed)?;

        let stats = CompactionStats {
            rows_examined: examined,
            rows_removed: removed,
            intervals_out: examined - removed,
        };
        info!(
            examined = stats.rows_examined,
            removed = stats.rows_removed,
            remaining = stats.intervals_out,
            "compacted archive intervals"
        );
        Ok(stats)
    }

    fn load_ordered_rows(&self) -> IndexResult<Vec<Row>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, network, station, location, channel, starttime, endtime
             FROM archive_data
             ORDER BY network, station, location, channel, starttime",
        )?;
        let mapped = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut rows = Vec::new();
        for item in mapped {
            let (id, network, station, location, channel, start_text, end_text) = item?;
            rows.push(Row {
                id,
                stream: (network, station, location, channel),
                start: parse_time(&start_text)?,
                end: parse_time(&end_text)?,
            });
        }
        Ok(rows)
    }

    fn apply_merge(
        &mut self,
        extended: &[(i64, DateTime<Utc>)],
        absorbed: &[i64],
    ) -> IndexResult<()> {
        if extended.is_empty() && absorbed.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        {
            let mut update = tx.prepare_cached(
                "UPDATE archive_data SET endtime = ?1 WHERE id = ?2",
            )?;
            for (id, end) in extended {
                update.execute(params![fmt_time(*end), id])?;
            }
            for chunk in absorbed.chunks(DELETE_CHUNK) {
                let placeholders = vec!["?"; chunk.len()].join(",");
                let sql = format!("DELETE FROM archive_data WHERE id IN ({})", placeholders);
                let mut delete = tx.prepare(&sql)?;
                delete.execute(rusqlite::params_from_iter(chunk.iter()))?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::RetryPolicy;
    use crate::model::{ArchiveInterval, Nslc};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn open_index(dir: &std::path::Path) -> TimeSeriesIndex {
        TimeSeriesIndex::open(&dir.join("index.sqlite"), &RetryPolicy::default()).unwrap()
    }

    fn bhz() -> Nslc {
        Nslc::new("IU", "ANMO", "00", "BHZ")
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn span(nslc: &Nslc, start: i64, end: i64) -> ArchiveInterval {
        ArchiveInterval::new(nslc.clone(), at(start), at(end))
    }

    #[test]
    fn test_gap_within_tolerance_merges() {
        let dir = tempdir().unwrap();
        let mut index = open_index(dir.path());
        // 30 s gap between the two spans.
        index
            .bulk_insert_intervals(&[span(&bhz(), 0, 600), span(&bhz(), 630, 1200)])
            .unwrap();

        let stats = index.compact(Duration::seconds(60)).unwrap();
        assert_eq!(stats.rows_examined, 2);
        assert_eq!(stats.rows_removed, 1);
        assert_eq!(stats.intervals_out, 1);

        let merged = index.intervals_overlapping(&bhz(), at(0), at(1200)).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].start, at(0));
        assert_eq!(merged[0].end, at(1200));
    }

    #[test]
    fn test_gap_beyond_tolerance_stays_split() {
        let dir = tempdir().unwrap();
        let mut index = open_index(dir.path());
        // 120 s gap, tolerance 60 s.
        index
            .bulk_insert_intervals(&[span(&bhz(), 0, 600), span(&bhz(), 720, 1200)])
            .unwrap();

        let stats = index.compact(Duration::seconds(60)).unwrap();
        assert_eq!(stats.rows_removed, 0);
        assert_eq!(stats.intervals_out, 2);
    }

    #[test]
    fn test_contained_interval_is_absorbed() {
        let dir = tempdir().unwrap();
        let mut index = open_index(dir.path());
        index
            .bulk_insert_intervals(&[span(&bhz(), 0, 1000), span(&bhz(), 100, 200)])
            .unwrap();

        index.compact(Duration::zero()).unwrap();
        let merged = index.intervals_overlapping(&bhz(), at(0), at(1000)).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].end, at(1000));
    }

    #[test]
    fn test_streams_never_merge_across() {
        let dir = tempdir().unwrap();
        let mut index = open_index(dir.path());
        let other = Nslc::new("IU", "ANMO", "00", "BHN");
        index
            .bulk_insert_intervals(&[span(&bhz(), 0, 600), span(&other, 600, 1200)])
            .unwrap();

        let stats = index.compact(Duration::seconds(3600)).unwrap();
        assert_eq!(stats.rows_removed, 0);
    }

    #[test]
    fn test_shuffled_inserts_compact_fully() {
        let dir = tempdir().unwrap();
        let mut index = open_index(dir.path());

        // Hour-long abutting spans inserted out of order.
        let mut spans: Vec<ArchiveInterval> =
            (0..24).map(|h| span(&bhz(), h * 3600, (h + 1) * 3600)).collect();
        spans.reverse();
        spans.swap(3, 17);
        spans.swap(8, 20);
        index.bulk_insert_intervals(&spans).unwrap();

        let stats = index.compact(Duration::zero()).unwrap();
        assert_eq!(stats.intervals_out, 1);

        let merged = index
            .intervals_overlapping(&bhz(), at(0), at(24 * 3600))
            .unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].start, at(0));
        assert_eq!(merged[0].end, at(24 * 3600));
    }

    #[test]
    fn test_compaction_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut index = open_index(dir.path());
        index
            .bulk_insert_intervals(&[span(&bhz(), 0, 600), span(&bhz(), 610, 1200)])
            .unwrap();

        index.compact(Duration::seconds(60)).unwrap();
        let again = index.compact(Duration::seconds(60)).unwrap();
        assert_eq!(again.rows_removed, 0);
        assert_eq!(again.intervals_out, 1);
    }
}
