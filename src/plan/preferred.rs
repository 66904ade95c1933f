//! Channel selection for stations offering multiple streams
//!
//! A station often serves the same ground motion on several channel bands
//! and location codes at once. Downloading all of them wastes archive
//! space, so per component (the trailing letter of the channel code) one
//! stream is chosen by band preference first, location preference second.

use chrono::{DateTime, Utc};

use crate::model::Channel;

/// Preference order for channel bands and location codes. Earlier entries
/// win; unlisted values rank last.
#[derive(Debug, Clone)]
pub struct ChannelPreference {
    pub bands: Vec<String>,
    pub locations: Vec<String>,
}

impl Default for ChannelPreference {
    fn default() -> Self {
        Self {
            bands: ["CH", "HH", "BH", "EH", "HN", "EN", "SH", "LH"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            locations: ["", "10", "00", "20", "30"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ChannelPreference {
    fn band_rank(&self, channel: &Channel) -> usize {
        self.bands
            .iter()
            .position(|band| band == channel.band_code())
            .unwrap_or(self.bands.len())
    }

    fn location_rank(&self, channel: &Channel) -> usize {
        // "--" and "" name the same blank location.
        let location = if channel.location == "--" {
            ""
        } else {
            channel.location.as_str()
        };
        self.locations
            .iter()
            .position(|loc| loc == location)
            .unwrap_or(self.locations.len())
    }
}

/// Pick one channel per component among those active at `at`.
///
/// Band preference strictly dominates location preference. If no channel
/// is active at `at`, the full channel list is returned unfiltered rather
/// than silently dropping the station.
pub fn preferred_channels(
    channels: &[Channel],
    preference: &ChannelPreference,
    at: DateTime<Utc>,
) -> Vec<Channel> {
    let mut best: Vec<(char, &Channel)> = Vec::new();
    for channel in channels.iter().filter(|c| c.is_active(at)) {
        let Some(component) = channel.component() else {
            continue;
        };
        match best.iter_mut().find(|(comp, _)| *comp == component) {
            Some((_, current)) => {
                let new_key = (preference.band_rank(channel), preference.location_rank(channel));
                let cur_key = (preference.band_rank(current), preference.location_rank(current));
                if new_key < cur_key {
                    *current = channel;
                }
            }
            None => best.push((component, channel)),
        }
    }

    if best.is_empty() {
        return channels.to_vec();
    }
    let mut selected: Vec<Channel> = best.into_iter().map(|(_, c)| c.clone()).collect();
    selected.sort_by(|a, b| (a.location.clone(), a.code.clone()).cmp(&(b.location.clone(), b.code.clone())));
    selected
}

/// Keep only the channels running at the station's highest sample rate.
pub fn highest_sample_rate(channels: &[Channel]) -> Vec<Channel> {
    let max_rate = channels
        .iter()
        .map(|c| c.sample_rate)
        .fold(f64::NEG_INFINITY, f64::max);
    channels
        .iter()
        .filter(|c| c.sample_rate == max_rate)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap()
    }

    fn channel(code: &str, location: &str, rate: f64) -> Channel {
        Channel {
            code: code.to_string(),
            location: location.to_string(),
            sample_rate: rate,
            start: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
            end: None,
        }
    }

    #[test]
    fn test_band_beats_location() {
        // HH on a worse location still wins over BH on the best location.
        let channels = vec![channel("BHZ", "", 20.0), channel("HHZ", "30", 100.0)];
        let picked = preferred_channels(&channels, &ChannelPreference::default(), at());
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].code, "HHZ");
    }

    #[test]
    fn test_location_breaks_band_ties() {
        let channels = vec![channel("BHZ", "00", 20.0), channel("BHZ", "10", 20.0)];
        let picked = preferred_channels(&channels, &ChannelPreference::default(), at());
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].location, "10");
    }

    #[test]
    fn test_one_channel_per_component() {
        let channels = vec![
            channel("BHZ", "00", 20.0),
            channel("BHN", "00", 20.0),
            channel("BHE", "00", 20.0),
            channel("HHZ", "00", 100.0),
        ];
        let picked = preferred_channels(&channels, &ChannelPreference::default(), at());
        assert_eq!(picked.len(), 3);
        assert!(picked.iter().any(|c| c.code == "HHZ"));
        assert!(!picked.iter().any(|c| c.code == "BHZ"));
    }

    #[test]
    fn test_dashes_equal_blank_location() {
        let channels = vec![channel("BHZ", "--", 20.0), channel("BHZ", "00", 20.0)];
        let picked = preferred_channels(&channels, &ChannelPreference::default(), at());
        assert_eq!(picked[0].location, "--");
    }

    #[test]
    fn test_inactive_station_returned_unfiltered() {
        let mut old = channel("BHZ", "00", 20.0);
        old.end = Some(Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap());
        let channels = vec![old.clone()];
        let picked = preferred_channels(&channels, &ChannelPreference::default(), at());
        assert_eq!(picked, channels);
    }

    #[test]
    fn test_highest_sample_rate() {
        let channels = vec![
            channel("BHZ", "00", 20.0),
            channel("HHZ", "00", 100.0),
            channel("HHN", "00", 100.0),
        ];
        let kept = highest_sample_rate(&channels);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|c| c.sample_rate == 100.0));
    }
}
