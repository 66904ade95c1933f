//! Request batching
//!
//! Pruned requests that share a network and an exact time window are
//! folded into one request whose station, location, and channel fields
//! carry sorted comma-joined lists. A source must treat those three lists
//! as an outer product of streams, which can name combinations the
//! originals did not; fetching a non-existent combination just returns
//! nothing.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::{Nslc, Request};

/// Merge requests sharing `(network, start, end)` into list-form requests.
///
/// Output is ordered by start time, then network.
pub fn combine_requests(requests: &[Request]) -> Vec<Request> {
    type Key = (DateTime<Utc>, DateTime<Utc>, String);
    let mut groups: BTreeMap<Key, (BTreeSet<String>, BTreeSet<String>, BTreeSet<String>)> =
        BTreeMap::new();

    for request in requests {
        let key = (request.start, request.end, request.nslc.network.clone());
        let (stations, locations, channels) = groups.entry(key).or_default();
        stations.insert(request.nslc.station.clone());
        locations.insert(request.nslc.location.clone());
        channels.insert(request.nslc.channel.clone());
    }

    let combined: Vec<Request> = groups
        .into_iter()
        .map(|((start, end, network), (stations, locations, channels))| {
            Request::new(
                Nslc {
                    network,
                    station: join(&stations),
                    location: join(&locations),
                    channel: join(&channels),
                },
                start,
                end,
            )
        })
        .collect();
    debug!(
        input = requests.len(),
        output = combined.len(),
        "combined requests"
    );
    combined
}

fn join(values: &BTreeSet<String>) -> String {
    values.iter().cloned().collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    fn request(net: &str, sta: &str, start: DateTime<Utc>) -> Request {
        Request::new(
            Nslc::new(net, sta, "00", "BHZ"),
            start,
            start + chrono::Duration::hours(1),
        )
    }

    #[test]
    fn test_same_window_same_network_merges() {
        let combined = combine_requests(&[
            request("IU", "COLA", t0()),
            request("IU", "ANMO", t0()),
        ]);
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].nslc.station, "ANMO,COLA");
        assert_eq!(combined[0].nslc.location, "00");
        assert_eq!(combined[0].nslc.channel, "BHZ");
    }

    #[test]
    fn test_different_windows_stay_apart() {
        let combined = combine_requests(&[
            request("IU", "ANMO", t0()),
            request("IU", "COLA", t0() + chrono::Duration::hours(2)),
        ]);
        assert_eq!(combined.len(), 2);
        assert!(combined[0].start < combined[1].start);
    }

    #[test]
    fn test_different_networks_stay_apart() {
        let combined = combine_requests(&[
            request("IU", "ANMO", t0()),
            request("GE", "WLF", t0()),
        ]);
        assert_eq!(combined.len(), 2);
    }

    #[test]
    fn test_duplicate_fields_collapse() {
        let combined = combine_requests(&[
            request("IU", "ANMO", t0()),
            request("IU", "ANMO", t0()),
        ]);
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].nslc.station, "ANMO");
    }
}
