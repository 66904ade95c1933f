//! Continuous-mode request planning
//!
//! Walks an inventory over a date range and produces one request per
//! selected channel per time chunk. The range end is clamped two minutes
//! behind the present so the plan never asks a source for samples it
//! cannot have settled yet.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::preferred::{preferred_channels, ChannelPreference};
use crate::model::{Inventory, Nslc, Request};

/// Seconds held back from `now` when the requested range reaches into the
/// present.
const SETTLE_MARGIN_SECS: i64 = 120;

/// Plan download requests for continuous data.
///
/// The range is cut into chunks of `window_days`; each chunk yields one
/// request per preferred channel of each station active at the chunk
/// start. Output is ordered by chunk, then inventory order.
pub fn plan_continuous(
    inventory: &Inventory,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    window_days: i64,
    preference: &ChannelPreference,
    now: DateTime<Utc>,
) -> Vec<Request> {
    let end = end.min(now - Duration::seconds(SETTLE_MARGIN_SECS));
    if start >= end {
        return Vec::new();
    }
    let window = Duration::days(window_days.max(1));

    let mut requests = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let chunk_end = (cursor + window).min(end);
        for network in &inventory.networks {
            for station in &network.stations {
                if !station.is_active(cursor) {
                    continue;
                }
                for channel in preferred_channels(&station.channels, preference, cursor) {
                    requests.push(Request::new(
                        Nslc::new(&network.code, &station.code, &channel.location, &channel.code),
                        cursor,
                        chunk_end,
                    ));
                }
            }
        }
        cursor = chunk_end;
    }
    debug!(
        count = requests.len(),
        start = %start,
        end = %end,
        "planned continuous requests"
    );
    requests
}
