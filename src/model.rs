//! Core data model for the archive synchronization engine
//!
//! Defines the identifiers, planning units, and persistent record types that
//! flow through the plan → prune → combine → archive pipeline:
//! - [`Nslc`]: the four-part Network/Station/Location/Channel stream id
//! - [`Request`]: an ephemeral planning unit (never persisted)
//! - [`Trace`]: a contiguous run of samples for one stream
//! - [`ArchiveInterval`] / [`ArrivalRecord`]: rows owned by the index
//! - [`Inventory`] / [`Catalog`]: station and event trees from the directory

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Network/Station/Location/Channel identifier for one data stream.
///
/// Location code `"--"` is normalized to the empty string on construction;
/// the two spellings mean the same thing in station metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nslc {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
}

impl Nslc {
    pub fn new(network: &str, station: &str, location: &str, channel: &str) -> Self {
        Self {
            network: network.to_string(),
            station: station.to_string(),
            location: normalize_location(location),
            channel: channel.to_string(),
        }
    }

    /// Dotted `NET.STA.LOC.CHA` label used in logs and filenames.
    pub fn label(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }

    /// `NET.STA` key used for per-station grouping.
    pub fn station_key(&self) -> String {
        format!("{}.{}", self.network, self.station)
    }
}

impl std::fmt::Display for Nslc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Normalize a location code: `"--"` and whitespace-only are empty.
pub fn normalize_location(location: &str) -> String {
    let trimmed = location.trim();
    if trimmed == "--" {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// An ephemeral planning unit: one stream over one time window.
///
/// Produced by the planner, narrowed by the pruner, widened by the combiner
/// (which may leave comma-joined lists in the station/location/channel
/// fields), and finally executed by the archive writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub nslc: Nslc,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Request {
    pub fn new(nslc: Nslc, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { nslc, start, end }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 1000.0
    }
}

/// A contiguous span of archived data for one stream, as recorded in the
/// index. Created by the archive writer after a successful day-file write;
/// extended or deleted only by compaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveInterval {
    pub nslc: Nslc,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ArchiveInterval {
    pub fn new(nslc: Nslc, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { nslc, start, end }
    }
}

/// Cached result of a travel-time computation for one (event, station) pair.
///
/// Keyed by `(event_id, s_netcode, s_stacode, s_start)`. This is a memoized
/// cache: once a record exists it is never recomputed, so staleness is
/// accepted as permanent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalRecord {
    pub event_id: String,
    pub e_mag: f64,
    pub e_lat: f64,
    pub e_lon: f64,
    pub e_depth_km: f64,
    /// Event origin time, seconds since epoch.
    pub e_time: f64,
    pub s_netcode: String,
    pub s_stacode: String,
    pub s_lat: f64,
    pub s_lon: f64,
    pub s_elev_km: f64,
    /// Station operating span, seconds since epoch. `s_end` is None for
    /// stations still running.
    pub s_start: Option<f64>,
    pub s_end: Option<f64>,
    pub dist_deg: f64,
    pub dist_km: f64,
    pub azimuth: f64,
    /// First arrival ("P"), seconds since epoch.
    pub p_arrival: f64,
    /// First S arrival, if one exists at this distance.
    pub s_arrival: Option<f64>,
    pub model: String,
}

/// A contiguous run of evenly spaced samples for one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub nslc: Nslc,
    /// Time of the first sample.
    pub start: DateTime<Utc>,
    /// Samples per second.
    pub sample_rate: f64,
    pub samples: Vec<f64>,
}

impl Trace {
    pub fn new(nslc: Nslc, start: DateTime<Utc>, sample_rate: f64, samples: Vec<f64>) -> Self {
        Self {
            nslc,
            start,
            sample_rate,
            samples,
        }
    }

    /// Sample period in whole microseconds.
    pub fn delta(&self) -> Duration {
        Duration::microseconds((1_000_000.0 / self.sample_rate).round() as i64)
    }

    /// Time of the last sample. Equals `start` for a single-sample trace.
    pub fn end(&self) -> DateTime<Utc> {
        if self.samples.is_empty() {
            return self.start;
        }
        self.start + self.delta() * (self.samples.len() as i32 - 1)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Extract the samples falling within `[start, end]` (inclusive of both
    /// boundary samples). Returns None if the window misses the trace.
    pub fn slice(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Trace> {
        if self.samples.is_empty() || end < self.start || start > self.end() {
            return None;
        }

        let delta_us = self.delta().num_microseconds().unwrap_or(1).max(1);
        let first = if start <= self.start {
            0
        } else {
            // Round up to the first sample at or after `start`.
            let offset_us = (start - self.start).num_microseconds().unwrap_or(0);
            ((offset_us + delta_us - 1) / delta_us) as usize
        };
        let last = if end >= self.end() {
            self.samples.len() - 1
        } else {
            let offset_us = (end - self.start).num_microseconds().unwrap_or(0);
            (offset_us / delta_us) as usize
        };

        if first > last || first >= self.samples.len() {
            return None;
        }

        Some(Trace {
            nslc: self.nslc.clone(),
            start: self.start + Duration::microseconds(first as i64 * delta_us),
            sample_rate: self.sample_rate,
            samples: self.samples[first..=last].to_vec(),
        })
    }
}

/// Station inventory tree as returned by the directory collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub networks: Vec<Network>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub code: String,
    pub stations: Vec<Station>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub code: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Elevation above sea level, meters.
    pub elevation_m: f64,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub channels: Vec<Channel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Full channel code, e.g. `BHZ`. The final character is the component.
    pub code: String,
    pub location: String,
    pub sample_rate: f64,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl Station {
    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && self.end.map_or(true, |end| at <= end)
    }
}

impl Channel {
    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && self.end.map_or(true, |end| at <= end)
    }

    /// Component letter: the final character of the channel code.
    pub fn component(&self) -> Option<char> {
        self.code.chars().last()
    }

    /// Band+instrument prefix, i.e. the code without its component letter.
    pub fn band_code(&self) -> &str {
        if self.code.is_empty() {
            ""
        } else {
            &self.code[..self.code.len() - 1]
        }
    }
}

/// A seismic event from the catalog service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Preferred origin resource id; unique within a catalog after dedup.
    pub id: String,
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    pub magnitude: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub events: Vec<Event>,
}

impl Catalog {
    /// Drop events sharing an id, keeping the first occurrence.
    pub fn dedup(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.events.retain(|event| seen.insert(event.id.clone()));
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// How much of one planned request ended up locally available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Coverage {
    /// No read-back was attempted (nothing was downloaded for the event).
    NotAttempted,
    /// Every requested (location, channel) combination is absent.
    AllMissing,
    /// Some combinations are absent; each is listed as `NET.STA.LOC.CHA`.
    Partial(Vec<String>),
    /// Everything requested is present.
    Complete,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bhz() -> Nslc {
        Nslc::new("IU", "ANMO", "00", "BHZ")
    }

    #[test]
    fn test_nslc_label() {
        assert_eq!(bhz().label(), "IU.ANMO.00.BHZ");
        assert_eq!(bhz().station_key(), "IU.ANMO");
    }

    #[test]
    fn test_location_normalization() {
        let nslc = Nslc::new("IU", "ANMO", "--", "BHZ");
        assert_eq!(nslc.location, "");
        assert_eq!(normalize_location("  "), "");
        assert_eq!(normalize_location("10"), "10");
    }

    #[test]
    fn test_trace_end() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let trace = Trace::new(bhz(), start, 1.0, vec![0.0; 60]);
        assert_eq!(trace.end(), start + Duration::seconds(59));

        let single = Trace::new(bhz(), start, 20.0, vec![1.0]);
        assert_eq!(single.end(), start);
    }

    #[test]
    fn test_trace_slice_interior() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let samples: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let trace = Trace::new(bhz(), start, 1.0, samples);

        let sliced = trace
            .slice(
                start + Duration::seconds(10),
                start + Duration::seconds(19),
            )
            .unwrap();
        assert_eq!(sliced.samples.len(), 10);
        assert_eq!(sliced.samples[0], 10.0);
        assert_eq!(sliced.start, start + Duration::seconds(10));
    }

    #[test]
    fn test_trace_slice_outside_window() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let trace = Trace::new(bhz(), start, 1.0, vec![0.0; 10]);

        assert!(trace
            .slice(start - Duration::seconds(20), start - Duration::seconds(10))
            .is_none());
        assert!(trace
            .slice(start + Duration::seconds(100), start + Duration::seconds(200))
            .is_none());
    }

    #[test]
    fn test_catalog_dedup() {
        let time = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let event = Event {
            id: "quake-1".to_string(),
            time,
            latitude: 0.0,
            longitude: 0.0,
            depth_km: 10.0,
            magnitude: 5.0,
        };
        let mut catalog = Catalog {
            events: vec![event.clone(), event.clone()],
        };
        catalog.dedup();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_channel_component() {
        let channel = Channel {
            code: "BHZ".to_string(),
            location: "00".to_string(),
            sample_rate: 20.0,
            start: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
            end: None,
        };
        assert_eq!(channel.component(), Some('Z'));
        assert_eq!(channel.band_code(), "BH");
    }
}
