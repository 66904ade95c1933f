//! Archive path and filename conventions
//!
//! One file per stream per UTC day:
//!
//! ```text
//! {root}/{year}/{net}/{sta}/{cha}.D/{NET}.{STA}.{LOC}.{CHA}.D.{YEAR}.{DOY}
//! ```
//!
//! `DOY` is the 1-based day of year, zero-padded to three digits. The `.D`
//! type code marks continuous waveform data.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

use super::{ArchiveError, ArchiveResult};
use crate::model::Nslc;

/// One UTC day of one stream: the unit of storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DayKey {
    pub nslc: Nslc,
    pub year: i32,
    pub doy: u32,
}

impl DayKey {
    pub fn for_time(nslc: &Nslc, time: DateTime<Utc>) -> Self {
        Self {
            nslc: nslc.clone(),
            year: time.year(),
            doy: time.ordinal(),
        }
    }

    /// Midnight at the start of this day.
    pub fn day_start(&self) -> ArchiveResult<DateTime<Utc>> {
        let date = NaiveDate::from_yo_opt(self.year, self.doy).ok_or_else(|| {
            ArchiveError::BadFileName(format!("year {} has no day {}", self.year, self.doy))
        })?;
        Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default()))
    }
}

/// `[start, end)` bounds of the UTC day containing `time`.
pub fn day_bounds(time: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.from_utc_datetime(
        &time
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default(),
    );
    (start, start + Duration::days(1))
}

/// Every day key a request window touches, in order.
pub fn days_spanning(nslc: &Nslc, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DayKey> {
    let mut keys = Vec::new();
    let mut cursor = day_bounds(start).0;
    while cursor < end {
        keys.push(DayKey::for_time(nslc, cursor));
        cursor += Duration::days(1);
    }
    if keys.is_empty() {
        keys.push(DayKey::for_time(nslc, start));
    }
    keys
}

pub fn day_file_name(key: &DayKey) -> String {
    format!(
        "{}.{}.{}.{}.D.{}.{:03}",
        key.nslc.network, key.nslc.station, key.nslc.location, key.nslc.channel, key.year, key.doy
    )
}

pub fn day_file_path(root: &Path, key: &DayKey) -> PathBuf {
    root.join(key.year.to_string())
        .join(&key.nslc.network)
        .join(&key.nslc.station)
        .join(format!("{}.D", key.nslc.channel))
        .join(day_file_name(key))
}

/// Parse a `NET.STA.LOC.CHA.D.YEAR.DOY` filename back into its day key.
///
/// An empty location code yields two consecutive dots in the name, so the
/// split is positional, not filtered.
pub fn parse_day_file_name(name: &str) -> ArchiveResult<DayKey> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 7 || parts[4] != "D" {
        return Err(ArchiveError::BadFileName(name.to_string()));
    }
    let year: i32 = parts[5]
        .parse()
        .map_err(|_| ArchiveError::BadFileName(name.to_string()))?;
    let doy: u32 = parts[6]
        .parse()
        .map_err(|_| ArchiveError::BadFileName(name.to_string()))?;
    if doy == 0 || doy > 366 {
        return Err(ArchiveError::BadFileName(name.to_string()));
    }
    Ok(DayKey {
        nslc: Nslc::new(parts[0], parts[1], parts[2], parts[3]),
        year,
        doy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bhz() -> Nslc {
        Nslc::new("IU", "ANMO", "00", "BHZ")
    }

    #[test]
    fn test_path_layout() {
        let key = DayKey {
            nslc: bhz(),
            year: 2020,
            doy: 5,
        };
        let path = day_file_path(Path::new("/archive"), &key);
        assert_eq!(
            path,
            Path::new("/archive/2020/IU/ANMO/BHZ.D/IU.ANMO.00.BHZ.D.2020.005")
        );
    }

    #[test]
    fn test_name_roundtrip_with_blank_location() {
        let key = DayKey {
            nslc: Nslc::new("GE", "WLF", "", "LHZ"),
            year: 2019,
            doy: 365,
        };
        let name = day_file_name(&key);
        assert_eq!(name, "GE.WLF..LHZ.D.2019.365");
        assert_eq!(parse_day_file_name(&name).unwrap(), key);
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        assert!(parse_day_file_name("IU.ANMO.00.BHZ.D.2020").is_err());
        assert!(parse_day_file_name("IU.ANMO.00.BHZ.X.2020.005").is_err());
        assert!(parse_day_file_name("IU.ANMO.00.BHZ.D.2020.999").is_err());
        assert!(parse_day_file_name("notaday").is_err());
    }

    #[test]
    fn test_days_spanning_crosses_midnight() {
        let start = Utc.with_ymd_and_hms(2020, 12, 31, 22, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2021, 1, 1, 2, 0, 0).unwrap();
        let keys = days_spanning(&bhz(), start, end);
        assert_eq!(keys.len(), 2);
        assert_eq!((keys[0].year, keys[0].doy), (2020, 366));
        assert_eq!((keys[1].year, keys[1].doy), (2021, 1));
    }

    #[test]
    fn test_day_start() {
        let key = DayKey {
            nslc: bhz(),
            year: 2021,
            doy: 1,
        };
        assert_eq!(
            key.day_start().unwrap(),
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
        );
    }
}
