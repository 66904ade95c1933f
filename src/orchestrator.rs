//! Sync pipeline orchestration
//!
//! Wires the planner, pruner, combiner, and archive writer into the two
//! top-level runs: continuous-range sync and event-window sync. Both poll
//! a [`CancelToken`] at the head of every loop; a cancelled run stops
//! cleanly, keeps everything already archived, and reports no partial
//! totals.
//!
//! No lock spans the read-index, plan, and write-index steps, so two
//! processes syncing the same archive can plan overlapping downloads. The
//! writes themselves are idempotent upserts, which keeps the race benign:
//! the second download wastes bandwidth, never corrupts coverage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::archive::{read_local_window, wildcard_to_regex, ArchiveError, ArchiveWriter};
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::index::{IndexError, TimeSeriesIndex};
use crate::model::{ArrivalRecord, Coverage, Event, Inventory, Request, Trace};
use crate::plan::{
    combine_requests, plan_continuous, plan_event, prune_requests, ChannelPreference,
    EventPlanOptions, PlanError,
};
use crate::sources::{
    ClientTable, DirectoryService, EventQuery, SourceError, StationQuery, TravelTimeModel,
    WaveformConnector,
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Totals for one finished run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub planned: usize,
    pub after_prune: usize,
    pub executed: usize,
    pub failed: usize,
    pub no_data: usize,
    pub events: Vec<EventSummary>,
}

/// Terminal state of a run.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunReport),
    /// The cancel token fired. Data archived before the cancel point stays
    /// on disk and in the index.
    Cancelled,
}

/// A read-back trace with the arrival metadata of its event attached.
#[derive(Debug, Clone)]
pub struct AnnotatedTrace {
    pub trace: Trace,
    pub arrival: Option<ArrivalRecord>,
}

/// Per-event accounting produced by an event-mode run.
#[derive(Debug, Clone)]
pub struct EventSummary {
    pub event_id: String,
    /// Coverage per `NET.STA`, in station order.
    pub coverage: Vec<(String, Coverage)>,
    pub traces: Vec<AnnotatedTrace>,
}

/// The sync engine: owns the index, the archive writer, and the client
/// table, and borrows the external services.
pub struct SyncEngine {
    config: Config,
    index: TimeSeriesIndex,
    writer: ArchiveWriter,
    clients: ClientTable,
    directory: Arc<dyn DirectoryService>,
    model: Arc<dyn TravelTimeModel>,
    cancel: CancelToken,
}

impl SyncEngine {
    /// Open the index, build the per-network client table from the
    /// configured credentials, and assemble the engine.
    pub fn new(
        config: Config,
        connector: &dyn WaveformConnector,
        directory: Arc<dyn DirectoryService>,
        model: Arc<dyn TravelTimeModel>,
        cancel: CancelToken,
    ) -> SyncResult<Self> {
        let index = TimeSeriesIndex::open(
            Path::new(&config.index.path),
            &config.index.retry_policy(),
        )?;
        let writer = ArchiveWriter::new(&PathBuf::from(&config.archive.root));

        let open = connector.connect(None)?;
        let mut clients = ClientTable::new(open);
        for credential in &config.credentials {
            match connector.connect(Some(credential)) {
                Ok(client) => {
                    let key = if credential.nslc_code.contains('.') {
                        credential.nslc_code.to_uppercase()
                    } else {
                        credential.network()
                    };
                    clients.insert(&key, client);
                }
                Err(err) => {
                    warn!(
                        network = %credential.network(),
                        error = %err,
                        "authenticated client unavailable, falling back to open access"
                    );
                }
            }
        }

        Ok(Self {
            config,
            index,
            writer,
            clients,
            directory,
            model,
            cancel,
        })
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn time_range(&self) -> SyncResult<(DateTime<Utc>, DateTime<Utc>)> {
        let parse = |label: &str, value: &Option<String>| -> SyncResult<DateTime<Utc>> {
            let text = value
                .as_deref()
                .ok_or_else(|| SyncError::Config(format!("waveform.{} is required", label)))?;
            DateTime::parse_from_rfc3339(text)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| SyncError::Config(format!("waveform.{}: {}", label, e)))
        };
        let start = parse("start", &self.config.waveform.start)?;
        let end = parse("end", &self.config.waveform.end)?;
        if start >= end {
            return Err(SyncError::Config("waveform.start must precede waveform.end".into()));
        }
        Ok((start, end))
    }

    fn station_query(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> StationQuery {
        StationQuery {
            network: Some(self.config.waveform.networks.clone()),
            station: Some(self.config.waveform.stations.clone()),
            location: Some(self.config.waveform.locations.clone()),
            channel: Some(self.config.waveform.channels.clone()),
            start: Some(start),
            end: Some(end),
            ..Default::default()
        }
    }

    fn preference(&self) -> ChannelPreference {
        self.config.processing.channel_preference()
    }

    /// Sleep the configured pacing interval, waking early on cancel.
    fn pace(&self) {
        let mut remaining = StdDuration::from_millis(self.config.processing.pacing_ms);
        let slice = StdDuration::from_millis(100);
        while !remaining.is_zero() {
            if self.cancel.is_cancelled() {
                return;
            }
            let nap = remaining.min(slice);
            std::thread::sleep(nap);
            remaining -= nap;
        }
    }

    /// Narrow requests to what is missing, unless a forced re-download was
    /// asked for.
    fn prune_unless_forced(&mut self, requests: Vec<Request>) -> SyncResult<Vec<Request>> {
        if self.config.processing.force_redownload {
            info!("forced re-download, skipping prune");
            return Ok(requests);
        }
        let min_window = Duration::seconds(self.config.waveform.min_window_secs);
        let root = self.writer.root().to_path_buf();
        Ok(prune_requests(
            &requests,
            &mut self.index,
            Some(&root),
            min_window,
        )?)
    }

    /// Execute combined requests one by one, pacing between fetches.
    /// Returns None if cancelled mid-loop.
    fn execute_all(&mut self, combined: &[Request], report: &mut RunReport) -> Option<()> {
        for request in combined {
            if self.cancel.is_cancelled() {
                return None;
            }
            match self.writer.execute(request, &self.clients, &mut self.index) {
                Ok(write) if write.fetch_failures > 0 => {
                    report.failed += 1;
                }
                Ok(write) if write.no_data => {
                    report.no_data += 1;
                }
                Ok(_) => {
                    report.executed += 1;
                }
                Err(err) => {
                    warn!(stream = %request.nslc, error = %err, "request failed");
                    report.failed += 1;
                }
            }
            self.pace();
        }
        Some(())
    }

    fn final_compaction(&mut self) -> SyncResult<()> {
        let tolerance = Duration::seconds(self.config.processing.gap_tolerance_secs);
        self.index.compact(tolerance)?;
        Ok(())
    }

    /// Sync a continuous time range for every selected station.
    pub fn run_continuous(&mut self) -> SyncResult<RunOutcome> {
        let (start, end) = self.time_range()?;
        let inventory = self.directory.list_stations(&self.station_query(start, end))?;
        info!(
            networks = inventory.networks.len(),
            start = %start,
            end = %end,
            "starting continuous sync"
        );

        let planned = plan_continuous(
            &inventory,
            start,
            end,
            self.config.waveform.window_days,
            &self.preference(),
            Utc::now(),
        );
        let mut report = RunReport {
            planned: planned.len(),
            ..Default::default()
        };

        let remaining = self.prune_unless_forced(planned)?;
        report.after_prune = remaining.len();
        let combined = combine_requests(&remaining);

        if self.execute_all(&combined, &mut report).is_none() {
            info!("continuous sync cancelled");
            return Ok(RunOutcome::Cancelled);
        }

        self.final_compaction()?;
        info!(
            planned = report.planned,
            executed = report.executed,
            failed = report.failed,
            no_data = report.no_data,
            "continuous sync finished"
        );
        Ok(RunOutcome::Completed(report))
    }

    /// Sync P-arrival windows for every catalog event in the range.
    pub fn run_event(&mut self) -> SyncResult<RunOutcome> {
        let (start, end) = self.time_range()?;
        let inventory = self.directory.list_stations(&self.station_query(start, end))?;
        let mut catalog = self.directory.list_events(&EventQuery {
            start: Some(start),
            end: Some(end),
            min_magnitude: Some(self.config.event.min_magnitude),
            ..Default::default()
        })?;
        catalog.dedup();
        info!(events = catalog.len(), "starting event sync");

        let options = EventPlanOptions {
            min_radius_deg: self.config.event.min_radius_deg,
            max_radius_deg: self.config.event.max_radius_deg,
            seconds_before_p: self.config.event.seconds_before_p,
            seconds_after_p: self.config.event.seconds_after_p,
            highest_samplerate_only: self.config.event.highest_samplerate_only,
        };
        let preference = self.preference();

        let mut report = RunReport::default();
        for event in &catalog.events {
            if self.cancel.is_cancelled() {
                info!("event sync cancelled");
                return Ok(RunOutcome::Cancelled);
            }
            let model = Arc::clone(&self.model);
            let plan = plan_event(
                event,
                &inventory,
                &self.index,
                model.as_ref(),
                &preference,
                &options,
                Utc::now(),
            )?;
            if !plan.arrivals.is_empty() {
                self.index.bulk_insert_arrivals(&plan.arrivals)?;
            }
            let planned = plan.requests;
            report.planned += planned.len();
            if planned.is_empty() {
                report.events.push(EventSummary {
                    event_id: event.id.clone(),
                    coverage: Vec::new(),
                    traces: Vec::new(),
                });
                continue;
            }

            let remaining = self.prune_unless_forced(planned.clone())?;
            report.after_prune += remaining.len();
            let combined = combine_requests(&remaining);
            if self.execute_all(&combined, &mut report).is_none() {
                info!("event sync cancelled");
                return Ok(RunOutcome::Cancelled);
            }

            report.events.push(self.summarize_event(event, &planned)?);
        }

        self.final_compaction()?;
        info!(
            events = report.events.len(),
            executed = report.executed,
            failed = report.failed,
            "event sync finished"
        );
        Ok(RunOutcome::Completed(report))
    }

    /// Read the planned windows back from disk, attach arrival metadata,
    /// and classify per-station coverage.
    fn summarize_event(
        &mut self,
        event: &Event,
        planned: &[Request],
    ) -> SyncResult<EventSummary> {
        let root = self.writer.root().to_path_buf();
        let mut traces = Vec::new();
        let mut read_back: Vec<Trace> = Vec::new();

        for request in planned {
            let found = read_local_window(&root, &request.nslc, request.start, request.end)?;
            for trace in found {
                let arrival = self.index.fetch_arrival(
                    &event.id,
                    &trace.nslc.network,
                    &trace.nslc.station,
                )?;
                read_back.push(trace.clone());
                traces.push(AnnotatedTrace { trace, arrival });
            }
        }

        Ok(EventSummary {
            event_id: event.id.clone(),
            coverage: missing_from_requests(planned, &read_back),
            traces,
        })
    }
}

/// Classify per-station coverage of `requests` given the traces actually
/// readable from the archive.
///
/// Request fields may carry comma-joined lists and `?`/`*` wildcards; each
/// expanded (station, location, channel) combination counts separately.
pub fn missing_from_requests(
    requests: &[Request],
    traces: &[Trace],
) -> Vec<(String, Coverage)> {
    // station key -> (present, missing labels)
    let mut tally: BTreeMap<String, (usize, Vec<String>)> = BTreeMap::new();

    for request in requests {
        for station in request.nslc.station.split(',') {
            let station_key = format!("{}.{}", request.nslc.network, station);
            let entry = tally.entry(station_key).or_default();
            for location in request.nslc.location.split(',') {
                for channel in request.nslc.channel.split(',') {
                    let found = traces.iter().any(|t| {
                        t.nslc.network == request.nslc.network
                            && field_matches(station, &t.nslc.station)
                            && field_matches(location, &t.nslc.location)
                            && field_matches(channel, &t.nslc.channel)
                    });
                    if found {
                        entry.0 += 1;
                    } else {
                        entry.1.push(format!(
                            "{}.{}.{}.{}",
                            request.nslc.network, station, location, channel
                        ));
                    }
                }
            }
        }
    }

    tally
        .into_iter()
        .map(|(station, (present, missing))| {
            let coverage = if present == 0 && missing.is_empty() {
                Coverage::NotAttempted
            } else if missing.is_empty() {
                Coverage::Complete
            } else if present == 0 {
                Coverage::AllMissing
            } else {
                Coverage::Partial(missing)
            };
            (station, coverage)
        })
        .collect()
}

fn field_matches(pattern: &str, value: &str) -> bool {
    if !pattern.contains(['?', '*']) {
        return pattern == value;
    }
    match wildcard_to_regex(pattern) {
        Ok(re) => re.is_match(value),
        Err(_) => pattern == value,
    }
}
