//! Local-mirror backend: serve the source traits from a day-file tree
//!
//! Lets one archive be synchronized from another reachable through the
//! filesystem (an NFS mount, a portable drive, a colleague's copy) with no
//! network service involved. The mirror's directory listing is derived
//! from the tree itself, so station coordinates are unknown and event
//! queries return nothing; continuous mode is the supported use.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::archive::{parse_day_file_name, read_local_window};
use crate::model::{Catalog, Channel, Inventory, Network, Nslc, Station, Trace};
use crate::sources::{
    Credential, DirectoryService, EventQuery, PhaseArrival, SourceError, StationQuery,
    TravelTimeModel, WaveformConnector, WaveformSource,
};

/// A waveform source and directory backed by a day-file tree on disk.
#[derive(Debug, Clone)]
pub struct MirrorBackend {
    root: PathBuf,
}

impl MirrorBackend {
    /// Open a mirror rooted at `root`. Fails if the directory is missing.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, SourceError> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(SourceError::Transport(format!(
                "mirror root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn directory(&self) -> MirrorDirectory {
        MirrorDirectory {
            root: self.root.clone(),
        }
    }

    fn source(&self) -> MirrorSource {
        MirrorSource {
            root: self.root.clone(),
        }
    }
}

impl WaveformConnector for MirrorBackend {
    fn connect(
        &self,
        _credential: Option<&Credential>,
    ) -> Result<Arc<dyn WaveformSource>, SourceError> {
        // Filesystem access needs no authentication; every credential maps
        // to the same reader.
        Ok(Arc::new(self.source()))
    }
}

struct MirrorSource {
    root: PathBuf,
}

impl WaveformSource for MirrorSource {
    fn fetch(
        &self,
        network: &str,
        station: &str,
        location: &str,
        channel: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Trace>, SourceError> {
        let mut traces = Vec::new();
        for sta in station.split(',') {
            for loc in location.split(',') {
                for cha in channel.split(',') {
                    let nslc = Nslc::new(network, sta, loc, cha);
                    let found = read_local_window(&self.root, &nslc, start, end)
                        .map_err(|e| SourceError::Transport(e.to_string()))?;
                    traces.extend(found);
                }
            }
        }
        if traces.is_empty() {
            return Err(SourceError::NoData);
        }
        Ok(traces)
    }
}

/// Directory listing derived from the mirror's tree.
///
/// Channels are enumerated from filenames; coordinates are unknowable
/// from the tree alone and reported as zero.
pub struct MirrorDirectory {
    root: PathBuf,
}

impl DirectoryService for MirrorDirectory {
    fn list_stations(&self, _query: &StationQuery) -> Result<Inventory, SourceError> {
        // (net, sta, loc, cha)
        let mut streams: BTreeSet<(String, String, String, String)> = BTreeSet::new();
        collect_streams(&self.root, &mut streams)
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let epoch = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).single().ok_or_else(|| {
            SourceError::Transport("epoch construction failed".to_string())
        })?;

        let mut inventory = Inventory::default();
        for (net, sta, loc, cha) in streams {
            let network = match inventory.networks.iter_mut().find(|n| n.code == net) {
                Some(network) => network,
                None => {
                    inventory.networks.push(Network {
                        code: net.clone(),
                        stations: Vec::new(),
                    });
                    inventory.networks.last_mut().ok_or_else(|| {
                        SourceError::Transport("inventory construction failed".to_string())
                    })?
                }
            };
            let station = match network.stations.iter_mut().find(|s| s.code == sta) {
                Some(station) => station,
                None => {
                    network.stations.push(Station {
                        code: sta.clone(),
                        latitude: 0.0,
                        longitude: 0.0,
                        elevation_m: 0.0,
                        start: epoch,
                        end: None,
                        channels: Vec::new(),
                    });
                    network.stations.last_mut().ok_or_else(|| {
                        SourceError::Transport("inventory construction failed".to_string())
                    })?
                }
            };
            if !station
                .channels
                .iter()
                .any(|c| c.code == cha && c.location == loc)
            {
                station.channels.push(Channel {
                    code: cha,
                    location: loc,
                    sample_rate: 0.0,
                    start: epoch,
                    end: None,
                });
            }
        }
        Ok(inventory)
    }

    fn list_events(&self, _query: &EventQuery) -> Result<Catalog, SourceError> {
        // A bare file tree carries no catalog.
        Ok(Catalog::default())
    }
}

fn collect_streams(
    dir: &Path,
    out: &mut BTreeSet<(String, String, String, String)>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_streams(&path, out)?;
        } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if let Ok(key) = parse_day_file_name(name) {
                out.insert((
                    key.nslc.network,
                    key.nslc.station,
                    key.nslc.location,
                    key.nslc.channel,
                ));
            }
        }
    }
    Ok(())
}

/// Travel-time stand-in for backends with no model: predicts nothing, so
/// event planning skips every station.
pub struct NoTravelTimes;

impl TravelTimeModel for NoTravelTimes {
    fn name(&self) -> &str {
        "none"
    }

    fn arrivals(
        &self,
        _depth_km: f64,
        _distance_deg: f64,
        _phases: &[&str],
    ) -> Result<Vec<PhaseArrival>, SourceError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{day_file_path, write_day_file, DayKey};
    use chrono::Duration;
    use tempfile::tempdir;

    fn bhz() -> Nslc {
        Nslc::new("IU", "ANMO", "00", "BHZ")
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    fn seed_mirror(root: &Path) {
        let key = DayKey::for_time(&bhz(), t0());
        let trace = Trace::new(bhz(), t0(), 1.0, vec![1.0; 3600]);
        write_day_file(&day_file_path(root, &key), &[trace]).unwrap();
    }

    #[test]
    fn test_open_rejects_missing_root() {
        assert!(MirrorBackend::open("/nonexistent/mirror").is_err());
    }

    #[test]
    fn test_directory_lists_streams_from_tree() {
        let dir = tempdir().unwrap();
        seed_mirror(dir.path());

        let backend = MirrorBackend::open(dir.path()).unwrap();
        let inventory = backend
            .directory()
            .list_stations(&StationQuery::default())
            .unwrap();
        assert_eq!(inventory.networks.len(), 1);
        assert_eq!(inventory.networks[0].code, "IU");
        assert_eq!(inventory.networks[0].stations[0].code, "ANMO");
        assert_eq!(inventory.networks[0].stations[0].channels[0].code, "BHZ");
    }

    #[test]
    fn test_fetch_reads_day_files() {
        let dir = tempdir().unwrap();
        seed_mirror(dir.path());

        let backend = MirrorBackend::open(dir.path()).unwrap();
        let source = backend.connect(None).unwrap();
        let traces = source
            .fetch("IU", "ANMO", "00", "BHZ", t0(), t0() + Duration::minutes(10))
            .unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].samples.len(), 601);

        assert!(matches!(
            source.fetch("GE", "WLF", "", "LHZ", t0(), t0() + Duration::hours(1)),
            Err(SourceError::NoData)
        ));
    }
}
