//! SQLite store for archive coverage and cached arrivals
//!
//! Two tables:
//! - `archive_data`: one row per contiguous archived span of one stream
//! - `arrival_data`: memoized travel-time results per (event, station)
//!
//! Timestamps are stored as fixed-width UTC text
//! (`%Y-%m-%dT%H:%M:%S%.6fZ`) so lexicographic ordering in SQL matches
//! chronological ordering. Import times are epoch seconds as REAL.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags};
use tracing::debug;

use super::retry::{connect_with_retry, RetryPolicy};
use super::{IndexError, IndexResult};
use crate::model::{ArchiveInterval, ArrivalRecord, Nslc};

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Cap on rows returned by the ad-hoc query path.
const QUERY_ROW_LIMIT: usize = 1000;

/// Format a timestamp for storage. Fixed width keeps text comparisons
/// consistent with time ordering.
pub(super) fn fmt_time(time: DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub(super) fn parse_time(text: &str) -> IndexResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| IndexError::InvalidTime(text.to_string()))
}

fn now_epoch() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

/// Result of an ad-hoc query against the index.
#[derive(Debug)]
pub enum QueryOutcome {
    /// A result table from a SELECT, capped at a fixed row limit.
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
        truncated: bool,
    },
    /// Row count affected by a non-SELECT statement.
    Affected(usize),
}

/// The availability index.
pub struct TimeSeriesIndex {
    pub(super) conn: Connection,
    path: PathBuf,
}

impl TimeSeriesIndex {
    /// Open (creating if absent) the index at `path`, waiting out lock
    /// contention per `policy`.
    pub fn open(path: &Path, policy: &RetryPolicy) -> IndexResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = connect_with_retry(policy, || {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA cache_size = 10000;
                PRAGMA temp_store = MEMORY;
                ",
            )?;
            Ok(conn)
        })?;

        let index = Self {
            conn,
            path: path.to_path_buf(),
        };
        index.create_schema()?;
        Ok(index)
    }

    fn create_schema(&self) -> IndexResult<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS archive_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                network TEXT NOT NULL,
                station TEXT NOT NULL,
                location TEXT NOT NULL,
                channel TEXT NOT NULL,
                starttime TEXT NOT NULL,
                endtime TEXT NOT NULL,
                importtime REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_archive_network ON archive_data(network);
            CREATE INDEX IF NOT EXISTS idx_archive_station ON archive_data(station);
            CREATE INDEX IF NOT EXISTS idx_archive_location ON archive_data(location);
            CREATE INDEX IF NOT EXISTS idx_archive_channel ON archive_data(channel);
            CREATE INDEX IF NOT EXISTS idx_archive_starttime ON archive_data(starttime);
            CREATE INDEX IF NOT EXISTS idx_archive_endtime ON archive_data(endtime);
            CREATE INDEX IF NOT EXISTS idx_archive_importtime ON archive_data(importtime);

            CREATE TABLE IF NOT EXISTS arrival_data (
                event_id TEXT NOT NULL,
                e_mag REAL NOT NULL,
                e_lat REAL NOT NULL,
                e_lon REAL NOT NULL,
                e_depth REAL NOT NULL,
                e_time REAL NOT NULL,
                s_netcode TEXT NOT NULL,
                s_stacode TEXT NOT NULL,
                s_lat REAL NOT NULL,
                s_lon REAL NOT NULL,
                s_elev REAL NOT NULL,
                s_start REAL,
                s_end REAL,
                dist_deg REAL NOT NULL,
                dist_km REAL NOT NULL,
                azimuth REAL NOT NULL,
                p_arrival REAL NOT NULL,
                s_arrival REAL,
                model TEXT NOT NULL,
                importtime REAL NOT NULL,
                PRIMARY KEY (event_id, s_netcode, s_stacode, s_start)
            );
            CREATE INDEX IF NOT EXISTS idx_arrival_event ON arrival_data(event_id);
            CREATE INDEX IF NOT EXISTS idx_arrival_station
                ON arrival_data(s_netcode, s_stacode);
            ",
        )?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Upsert archived spans, stamping the current import time on each.
    ///
    /// Idempotent: replaying the same spans leaves one row per span, with
    /// only the import stamp advancing.
    pub fn bulk_insert_intervals(&mut self, intervals: &[ArchiveInterval]) -> IndexResult<usize> {
        if intervals.is_empty() {
            return Ok(0);
        }
        let stamp = now_epoch();
        let tx = self.conn.transaction()?;
        {
            // Dedup on the natural key rather than the autoincrement id.
            let mut delete = tx.prepare_cached(
                "DELETE FROM archive_data
                 WHERE network = ?1 AND station = ?2 AND location = ?3
                   AND channel = ?4 AND starttime = ?5 AND endtime = ?6",
            )?;
            let mut insert = tx.prepare_cached(
                "INSERT INTO archive_data
                     (network, station, location, channel, starttime, endtime, importtime)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for interval in intervals {
                let start = fmt_time(interval.start);
                let end = fmt_time(interval.end);
                delete.execute(params![
                    interval.nslc.network,
                    interval.nslc.station,
                    interval.nslc.location,
                    interval.nslc.channel,
                    start,
                    end,
                ])?;
                insert.execute(params![
                    interval.nslc.network,
                    interval.nslc.station,
                    interval.nslc.location,
                    interval.nslc.channel,
                    start,
                    end,
                    stamp,
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = intervals.len(), "recorded archive intervals");
        Ok(intervals.len())
    }

    /// Upsert cached arrival records, stamping the current import time.
    pub fn bulk_insert_arrivals(&mut self, records: &[ArrivalRecord]) -> IndexResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let stamp = now_epoch();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO arrival_data
                     (event_id, e_mag, e_lat, e_lon, e_depth, e_time,
                      s_netcode, s_stacode, s_lat, s_lon, s_elev, s_start, s_end,
                      dist_deg, dist_km, azimuth, p_arrival, s_arrival, model, importtime)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                         ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.event_id,
                    r.e_mag,
                    r.e_lat,
                    r.e_lon,
                    r.e_depth_km,
                    r.e_time,
                    r.s_netcode,
                    r.s_stacode,
                    r.s_lat,
                    r.s_lon,
                    r.s_elev_km,
                    r.s_start,
                    r.s_end,
                    r.dist_deg,
                    r.dist_km,
                    r.azimuth,
                    r.p_arrival,
                    r.s_arrival,
                    r.model,
                    stamp,
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Look up the cached arrival for one (event, station) pair.
    pub fn fetch_arrival(
        &self,
        event_id: &str,
        netcode: &str,
        stacode: &str,
    ) -> IndexResult<Option<ArrivalRecord>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {} FROM arrival_data
             WHERE event_id = ?1 AND s_netcode = ?2 AND s_stacode = ?3
             LIMIT 1",
            ARRIVAL_COLUMNS
        ))?;
        let record = stmt
            .query_row(params![event_id, netcode, stacode], row_to_arrival)
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(record)
    }

    /// All cached arrivals for one event, ordered by distance.
    pub fn arrivals_for_event(&self, event_id: &str) -> IndexResult<Vec<ArrivalRecord>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {} FROM arrival_data WHERE event_id = ?1 ORDER BY dist_deg",
            ARRIVAL_COLUMNS
        ))?;
        let rows = stmt.query_map(params![event_id], row_to_arrival)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// All cached arrivals for one station, ordered by event time.
    pub fn arrivals_for_station(
        &self,
        netcode: &str,
        stacode: &str,
    ) -> IndexResult<Vec<ArrivalRecord>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {} FROM arrival_data
             WHERE s_netcode = ?1 AND s_stacode = ?2 ORDER BY e_time",
            ARRIVAL_COLUMNS
        ))?;
        let rows = stmt.query_map(params![netcode, stacode], row_to_arrival)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Archived spans of one stream overlapping `[start, end]`, ordered by
    /// start time.
    pub fn intervals_overlapping(
        &self,
        nslc: &Nslc,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> IndexResult<Vec<ArchiveInterval>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT network, station, location, channel, starttime, endtime
             FROM archive_data
             WHERE network = ?1 AND station = ?2 AND location = ?3 AND channel = ?4
               AND endtime >= ?5 AND starttime <= ?6
             ORDER BY starttime",
        )?;
        let rows = stmt.query_map(
            params![
                nslc.network,
                nslc.station,
                nslc.location,
                nslc.channel,
                fmt_time(start),
                fmt_time(end),
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )?;

        let mut intervals = Vec::new();
        for row in rows {
            let (network, station, location, channel, start_text, end_text) = row?;
            intervals.push(ArchiveInterval::new(
                Nslc::new(&network, &station, &location, &channel),
                parse_time(&start_text)?,
                parse_time(&end_text)?,
            ));
        }
        Ok(intervals)
    }

    pub fn interval_count(&self) -> IndexResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM archive_data", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Delete rows from a table by import-time range. Only the two index
    /// tables are addressable.
    pub fn delete_imported_between(
        &mut self,
        table: &str,
        start_epoch: f64,
        end_epoch: f64,
    ) -> IndexResult<usize> {
        if table != "archive_data" && table != "arrival_data" {
            return Err(IndexError::InvalidTable(table.to_string()));
        }
        let affected = self.conn.execute(
            &format!("DELETE FROM {} WHERE importtime >= ?1 AND importtime <= ?2", table),
            params![start_epoch, end_epoch],
        )?;
        Ok(affected)
    }

    pub fn reindex(&mut self) -> IndexResult<()> {
        self.conn.execute_batch("REINDEX;")?;
        Ok(())
    }

    pub fn analyze(&mut self) -> IndexResult<()> {
        self.conn.execute_batch("ANALYZE;")?;
        Ok(())
    }

    pub fn vacuum(&mut self) -> IndexResult<()> {
        self.conn.execute_batch("VACUUM;")?;
        Ok(())
    }

    pub fn checkpoint(&mut self) -> IndexResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    /// Run an ad-hoc SQL statement against the index.
    ///
    /// SELECTs return a bounded result table; anything else returns the
    /// affected row count. Errors come back as `IndexError::Sqlite` rather
    /// than aborting the process.
    pub fn execute_query(&mut self, sql: &str) -> IndexResult<QueryOutcome> {
        let is_select = sql.trim_start().to_uppercase().starts_with("SELECT");
        if !is_select {
            let affected = self.conn.execute(sql, [])?;
            return Ok(QueryOutcome::Affected(affected));
        }

        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let column_count = columns.len();

        let mut rows = Vec::new();
        let mut truncated = false;
        let mut result_rows = stmt.query([])?;
        while let Some(row) = result_rows.next()? {
            if rows.len() >= QUERY_ROW_LIMIT {
                truncated = true;
                break;
            }
            let mut cells = Vec::with_capacity(column_count);
            for i in 0..column_count {
                cells.push(render_value(row.get_ref(i)?));
            }
            rows.push(cells);
        }

        Ok(QueryOutcome::Table {
            columns,
            rows,
            truncated,
        })
    }
}

const ARRIVAL_COLUMNS: &str = "event_id, e_mag, e_lat, e_lon, e_depth, e_time, \
     s_netcode, s_stacode, s_lat, s_lon, s_elev, s_start, s_end, \
     dist_deg, dist_km, azimuth, p_arrival, s_arrival, model";

fn row_to_arrival(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArrivalRecord> {
    Ok(ArrivalRecord {
        event_id: row.get(0)?,
        e_mag: row.get(1)?,
        e_lat: row.get(2)?,
        e_lon: row.get(3)?,
        e_depth_km: row.get(4)?,
        e_time: row.get(5)?,
        s_netcode: row.get(6)?,
        s_stacode: row.get(7)?,
        s_lat: row.get(8)?,
        s_lon: row.get(9)?,
        s_elev_km: row.get(10)?,
        s_start: row.get(11)?,
        s_end: row.get(12)?,
        dist_deg: row.get(13)?,
        dist_km: row.get(14)?,
        azimuth: row.get(15)?,
        p_arrival: row.get(16)?,
        s_arrival: row.get(17)?,
        model: row.get(18)?,
    })
}

fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).to_string(),
        ValueRef::Blob(b) => format!("<blob {} bytes>", b.len()),
    }
}
