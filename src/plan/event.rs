//! Event-mode request planning
//!
//! For each station near enough to an event, a download window is centered
//! on the predicted P arrival. Travel-time results are memoized in the
//! index per (event, station) pair: cached records are read here, and any
//! freshly computed ones are handed back to the caller for one bulk
//! insert, so replanning the same event costs no model calls.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::preferred::{highest_sample_rate, preferred_channels, ChannelPreference};
use super::PlanResult;
use crate::geo;
use crate::index::TimeSeriesIndex;
use crate::model::{ArrivalRecord, Event, Inventory, Nslc, Request, Station};
use crate::sources::TravelTimeModel;

const SETTLE_MARGIN_SECS: i64 = 120;

/// Distance above which an absent S arrival is unremarkable.
const S_EXPECTED_MAX_DEG: f64 = 90.0;

#[derive(Debug, Clone)]
pub struct EventPlanOptions {
    /// Stations closer than this to the epicenter are skipped.
    pub min_radius_deg: f64,
    /// Stations farther than this are skipped.
    pub max_radius_deg: f64,
    /// Window opens this many seconds before the P arrival.
    pub seconds_before_p: f64,
    /// Window closes this many seconds after the P arrival.
    pub seconds_after_p: f64,
    /// Keep only each station's highest-sample-rate channels.
    pub highest_samplerate_only: bool,
}

impl Default for EventPlanOptions {
    fn default() -> Self {
        Self {
            min_radius_deg: 0.0,
            max_radius_deg: 90.0,
            seconds_before_p: 20.0,
            seconds_after_p: 160.0,
            highest_samplerate_only: false,
        }
    }
}

/// One event's planned downloads plus the arrival records computed fresh
/// along the way. The caller persists the arrivals in one bulk insert.
#[derive(Debug, Clone, Default)]
pub struct EventPlan {
    pub requests: Vec<Request>,
    pub arrivals: Vec<ArrivalRecord>,
}

fn epoch_to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
}

/// Plan P-window requests for one event.
///
/// Returns the requests in inventory order. Stations outside the radius
/// band, or without a P prediction, contribute nothing.
pub fn plan_event(
    event: &Event,
    inventory: &Inventory,
    index: &TimeSeriesIndex,
    model: &dyn TravelTimeModel,
    preference: &ChannelPreference,
    options: &EventPlanOptions,
    now: DateTime<Utc>,
) -> PlanResult<EventPlan> {
    let mut plan = EventPlan::default();

    for network in &inventory.networks {
        for station in &network.stations {
            let dist_deg = geo::distance_deg(
                event.latitude,
                event.longitude,
                station.latitude,
                station.longitude,
            );
            if dist_deg < options.min_radius_deg || dist_deg > options.max_radius_deg {
                debug!(
                    station = %format!("{}.{}", network.code, station.code),
                    dist_deg,
                    "outside radius band"
                );
                continue;
            }

            let cached = index.fetch_arrival(&event.id, &network.code, &station.code)?;
            let p_epoch = match cached {
                Some(record) => record.p_arrival,
                None => {
                    match compute_arrival(event, &network.code, station, dist_deg, model)? {
                        Some(record) => {
                            let p = record.p_arrival;
                            plan.arrivals.push(record);
                            p
                        }
                        None => continue,
                    }
                }
            };

            let Some(p_time) = epoch_to_datetime(p_epoch) else {
                warn!(event = %event.id, p_epoch, "unrepresentable arrival time");
                continue;
            };
            let start = p_time - Duration::milliseconds((options.seconds_before_p * 1000.0) as i64);
            let end = (p_time + Duration::milliseconds((options.seconds_after_p * 1000.0) as i64))
                .min(now - Duration::seconds(SETTLE_MARGIN_SECS));
            if start >= end {
                continue;
            }

            let mut channels = preferred_channels(&station.channels, preference, event.time);
            if options.highest_samplerate_only {
                channels = highest_sample_rate(&channels);
            }
            for channel in channels {
                plan.requests.push(Request::new(
                    Nslc::new(&network.code, &station.code, &channel.location, &channel.code),
                    start,
                    end,
                ));
            }
        }
    }
    Ok(plan)
}

/// Run the travel-time model for one (event, station) pair.
///
/// Returns None when the model predicts no P arrival at this distance;
/// that station is skipped, not failed.
fn compute_arrival(
    event: &Event,
    netcode: &str,
    station: &Station,
    dist_deg: f64,
    model: &dyn TravelTimeModel,
) -> PlanResult<Option<ArrivalRecord>> {
    let arrivals = model.arrivals(event.depth_km, dist_deg, &["P", "S"])?;
    let origin_epoch = event.time.timestamp_micros() as f64 / 1e6;

    let p_rel = arrivals
        .iter()
        .find(|a| a.phase.to_uppercase().starts_with('P'))
        .map(|a| a.relative_secs);
    let s_rel = arrivals
        .iter()
        .find(|a| a.phase.to_uppercase().starts_with('S'))
        .map(|a| a.relative_secs);

    let Some(p_rel) = p_rel else {
        warn!(
            event = %event.id,
            station = %format!("{}.{}", netcode, station.code),
            dist_deg,
            "no P arrival predicted, skipping station"
        );
        return Ok(None);
    };
    if s_rel.is_none() && dist_deg <= S_EXPECTED_MAX_DEG {
        warn!(
            event = %event.id,
            station = %format!("{}.{}", netcode, station.code),
            dist_deg,
            "no S arrival predicted at regional distance"
        );
    }

    Ok(Some(ArrivalRecord {
        event_id: event.id.clone(),
        e_mag: event.magnitude,
        e_lat: event.latitude,
        e_lon: event.longitude,
        e_depth_km: event.depth_km,
        e_time: origin_epoch,
        s_netcode: netcode.to_string(),
        s_stacode: station.code.clone(),
        s_lat: station.latitude,
        s_lon: station.longitude,
        s_elev_km: station.elevation_m / 1000.0,
        s_start: Some(station.start.timestamp_micros() as f64 / 1e6),
        s_end: station.end.map(|t| t.timestamp_micros() as f64 / 1e6),
        dist_deg,
        dist_km: geo::distance_km(
            event.latitude,
            event.longitude,
            station.latitude,
            station.longitude,
        ),
        azimuth: geo::azimuth_deg(
            event.latitude,
            event.longitude,
            station.latitude,
            station.longitude,
        ),
        p_arrival: origin_epoch + p_rel,
        s_arrival: s_rel.map(|rel| origin_epoch + rel),
        model: model.name().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::RetryPolicy;
    use crate::model::{Channel, Network};
    use crate::sources::{PhaseArrival, SourceError};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct FixedModel {
        p: Option<f64>,
        s: Option<f64>,
        calls: AtomicUsize,
    }

    impl FixedModel {
        fn new(p: Option<f64>, s: Option<f64>) -> Self {
            Self {
                p,
                s,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TravelTimeModel for FixedModel {
        fn name(&self) -> &str {
            "iasp91"
        }

        fn arrivals(
            &self,
            _depth_km: f64,
            _distance_deg: f64,
            _phases: &[&str],
        ) -> Result<Vec<PhaseArrival>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = Vec::new();
            if let Some(p) = self.p {
                out.push(PhaseArrival {
                    phase: "P".to_string(),
                    relative_secs: p,
                });
            }
            if let Some(s) = self.s {
                out.push(PhaseArrival {
                    phase: "S".to_string(),
                    relative_secs: s,
                });
            }
            Ok(out)
        }
    }

    fn event() -> Event {
        Event {
            id: "quake-1".to_string(),
            time: Utc.with_ymd_and_hms(2020, 1, 1, 12, 0, 0).unwrap(),
            latitude: 0.0,
            longitude: 0.0,
            depth_km: 10.0,
            magnitude: 6.0,
        }
    }

    fn inventory(station_lat: f64) -> Inventory {
        let channel = Channel {
            code: "BHZ".to_string(),
            location: "00".to_string(),
            sample_rate: 20.0,
            start: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
            end: None,
        };
        Inventory {
            networks: vec![Network {
                code: "IU".to_string(),
                stations: vec![Station {
                    code: "ANMO".to_string(),
                    latitude: station_lat,
                    longitude: 0.0,
                    elevation_m: 1740.0,
                    start: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
                    end: None,
                    channels: vec![channel],
                }],
            }],
        }
    }

    fn open_index(dir: &std::path::Path) -> TimeSeriesIndex {
        TimeSeriesIndex::open(&dir.join("index.sqlite"), &RetryPolicy::default()).unwrap()
    }

    fn far_future() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_window_centered_on_p() {
        let dir = tempdir().unwrap();
        let index = open_index(dir.path());
        let model = FixedModel::new(Some(600.0), Some(1100.0));
        let options = EventPlanOptions {
            seconds_before_p: 20.0,
            seconds_after_p: 160.0,
            ..Default::default()
        };

        let plan = plan_event(
            &event(),
            &inventory(40.0),
            &index,
            &model,
            &ChannelPreference::default(),
            &options,
            far_future(),
        )
        .unwrap();

        assert_eq!(plan.requests.len(), 1);
        let p_time = event().time + Duration::seconds(600);
        assert_eq!(plan.requests[0].start, p_time - Duration::seconds(20));
        assert_eq!(plan.requests[0].end, p_time + Duration::seconds(160));
    }

    #[test]
    fn test_second_plan_hits_cache() {
        let dir = tempdir().unwrap();
        let mut index = open_index(dir.path());
        let model = FixedModel::new(Some(600.0), Some(1100.0));
        let options = EventPlanOptions::default();

        let first = plan_event(
            &event(),
            &inventory(40.0),
            &index,
            &model,
            &ChannelPreference::default(),
            &options,
            far_future(),
        )
        .unwrap();
        assert_eq!(first.arrivals.len(), 1);
        index.bulk_insert_arrivals(&first.arrivals).unwrap();

        let second = plan_event(
            &event(),
            &inventory(40.0),
            &index,
            &model,
            &ChannelPreference::default(),
            &options,
            far_future(),
        )
        .unwrap();
        assert!(second.arrivals.is_empty());
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);

        let record = index.fetch_arrival("quake-1", "IU", "ANMO").unwrap().unwrap();
        assert_eq!(record.model, "iasp91");
        assert!(record.s_arrival.is_some());
    }

    #[test]
    fn test_radius_gating() {
        let dir = tempdir().unwrap();
        let index = open_index(dir.path());
        let model = FixedModel::new(Some(600.0), None);
        let options = EventPlanOptions {
            min_radius_deg: 5.0,
            max_radius_deg: 30.0,
            ..Default::default()
        };

        // Station at 40 degrees, outside the band.
        let plan = plan_event(
            &event(),
            &inventory(40.0),
            &index,
            &model,
            &ChannelPreference::default(),
            &options,
            far_future(),
        )
        .unwrap();
        assert!(plan.requests.is_empty());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_p_skips_station() {
        let dir = tempdir().unwrap();
        let index = open_index(dir.path());
        let model = FixedModel::new(None, None);

        let plan = plan_event(
            &event(),
            &inventory(40.0),
            &index,
            &model,
            &ChannelPreference::default(),
            &EventPlanOptions::default(),
            far_future(),
        )
        .unwrap();
        assert!(plan.requests.is_empty());
        assert!(plan.arrivals.is_empty());
        assert!(index.fetch_arrival("quake-1", "IU", "ANMO").unwrap().is_none());
    }

    #[test]
    fn test_highest_samplerate_only_filters_channels() {
        let dir = tempdir().unwrap();
        let index = open_index(dir.path());
        let model = FixedModel::new(Some(600.0), Some(1100.0));
        let active_since = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let channel = |code: &str, rate: f64| Channel {
            code: code.to_string(),
            location: "00".to_string(),
            sample_rate: rate,
            start: active_since,
            end: None,
        };

        let mut inv = inventory(40.0);
        inv.networks[0].stations[0].channels = vec![
            channel("HHZ", 100.0),
            channel("HHN", 100.0),
            channel("LHE", 1.0),
        ];

        let all = plan_event(
            &event(),
            &inv,
            &index,
            &model,
            &ChannelPreference::default(),
            &EventPlanOptions::default(),
            far_future(),
        )
        .unwrap();
        assert_eq!(all.requests.len(), 3);

        let options = EventPlanOptions {
            highest_samplerate_only: true,
            ..Default::default()
        };
        let fast = plan_event(
            &event(),
            &inv,
            &index,
            &model,
            &ChannelPreference::default(),
            &options,
            far_future(),
        )
        .unwrap();
        assert_eq!(fast.requests.len(), 2);
        assert!(fast.requests.iter().all(|r| r.nslc.channel.starts_with("HH")));
    }
}
