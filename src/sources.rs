//! External collaborator interfaces
//!
//! The engine never speaks a wire protocol itself. Waveform retrieval,
//! station/event directories, and travel-time computation live behind the
//! traits here; production wiring supplies FDSN-backed implementations,
//! tests supply mocks.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::model::{Catalog, Inventory, Trace};

/// Errors from external data services.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The service answered but holds no data for the query. Benign.
    #[error("no data available for the requested window")]
    NoData,

    /// The service rejected the query.
    #[error("request rejected (status {status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// Transport-level failure (connect, timeout, protocol).
    #[error("transport error: {0}")]
    Transport(String),
}

/// A provider of raw waveform data.
///
/// The string fields accept comma-joined lists (e.g. `"ANMO,COLA"`); the
/// provider treats the four lists as an outer product of streams.
pub trait WaveformSource: Send + Sync {
    fn fetch(
        &self,
        network: &str,
        station: &str,
        location: &str,
        channel: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Trace>, SourceError>;
}

/// Spatial constraint for station and event queries.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoConstraint {
    Bounding {
        min_lat: f64,
        max_lat: f64,
        min_lon: f64,
        max_lon: f64,
    },
    Circle {
        lat: f64,
        lon: f64,
        min_radius_deg: f64,
        max_radius_deg: f64,
    },
}

/// Station directory query. All fields optional; `extra` carries
/// provider-specific parameters verbatim.
#[derive(Debug, Clone, Default)]
pub struct StationQuery {
    pub network: Option<String>,
    pub station: Option<String>,
    pub location: Option<String>,
    pub channel: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub geo: Option<GeoConstraint>,
    pub extra: HashMap<String, String>,
}

/// Event catalog query.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub min_magnitude: Option<f64>,
    pub max_magnitude: Option<f64>,
    pub min_depth_km: Option<f64>,
    pub max_depth_km: Option<f64>,
    pub geo: Option<GeoConstraint>,
    pub extra: HashMap<String, String>,
}

/// Directory of station metadata and event catalogs.
pub trait DirectoryService: Send + Sync {
    fn list_stations(&self, query: &StationQuery) -> Result<Inventory, SourceError>;
    fn list_events(&self, query: &EventQuery) -> Result<Catalog, SourceError>;
}

/// One predicted phase arrival, relative to event origin time.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseArrival {
    /// Phase label as reported by the model, e.g. `P`, `Pdiff`, `S`.
    pub phase: String,
    /// Travel time in seconds after origin.
    pub relative_secs: f64,
}

/// Travel-time computation for an event/station geometry.
pub trait TravelTimeModel: Send + Sync {
    /// Model identifier recorded alongside cached arrivals, e.g. `iasp91`.
    fn name(&self) -> &str;

    /// Predicted arrivals for the given source depth and epicentral
    /// distance, restricted to the listed phase names.
    fn arrivals(
        &self,
        depth_km: f64,
        distance_deg: f64,
        phases: &[&str],
    ) -> Result<Vec<PhaseArrival>, SourceError>;
}

/// One credential entry from configuration. `nslc_code` names the network
/// (or `NET.STA` pair) the credential unlocks.
#[derive(Debug, Clone, Deserialize)]
pub struct Credential {
    pub nslc_code: String,
    pub username: String,
    pub password: String,
}

impl Credential {
    /// The network portion of the code, uppercased.
    pub fn network(&self) -> String {
        self.nslc_code
            .split('.')
            .next()
            .unwrap_or("")
            .to_uppercase()
    }
}

/// Builds waveform clients, optionally authenticated.
pub trait WaveformConnector: Send + Sync {
    fn connect(
        &self,
        credential: Option<&Credential>,
    ) -> Result<Arc<dyn WaveformSource>, SourceError>;
}

/// Key under which the unauthenticated client is stored.
pub const OPEN_CLIENT: &str = "open";

/// Per-network client lookup with a shared fallback.
///
/// Resolution order: exact `NET` key, then `NET.STA`, then the open client.
pub struct ClientTable {
    clients: HashMap<String, Arc<dyn WaveformSource>>,
}

impl ClientTable {
    pub fn new(open: Arc<dyn WaveformSource>) -> Self {
        let mut clients = HashMap::new();
        clients.insert(OPEN_CLIENT.to_string(), open);
        Self { clients }
    }

    pub fn insert(&mut self, key: &str, client: Arc<dyn WaveformSource>) {
        self.clients.insert(key.to_uppercase(), client);
    }

    pub fn resolve(&self, network: &str, station: &str) -> Arc<dyn WaveformSource> {
        let net_key = network.to_uppercase();
        if let Some(client) = self.clients.get(&net_key) {
            return Arc::clone(client);
        }
        let sta_key = format!("{}.{}", net_key, station.to_uppercase());
        if let Some(client) = self.clients.get(&sta_key) {
            return Arc::clone(client);
        }
        // The open client is installed in new(), so this always hits.
        Arc::clone(&self.clients[OPEN_CLIENT])
    }
}

impl std::fmt::Debug for ClientTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.clients.keys().collect();
        keys.sort();
        f.debug_struct("ClientTable").field("keys", &keys).finish()
    }
}
