//! # Seisarc
//!
//! Archive synchronization engine for day-partitioned seismic waveform
//! data. Seisarc plans what is worth downloading, prunes what the local
//! archive already holds, batches the remainder into efficient requests,
//! and folds the results into a day-file tree backed by a SQLite
//! availability index.
//!
//! ## Modules
//!
//! - [`index`]: SQLite availability index and arrival cache
//! - [`plan`]: request planning, pruning, and batching
//! - [`archive`]: day-file tree, codec, writer, and rescans
//! - [`orchestrator`]: the continuous and event sync pipelines
//! - [`sources`]: traits for the external waveform and metadata services
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use seisarc::{CancelToken, Config, MirrorBackend, SyncEngine};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!
//!     // Sync from another day-file tree on local disk.
//!     let backend = MirrorBackend::open("/mnt/upstream/archive")?;
//!     let mut engine = SyncEngine::new(
//!         config,
//!         &backend,
//!         Arc::new(backend.directory()),
//!         Arc::new(seisarc::mirror::NoTravelTimes),
//!         CancelToken::new(),
//!     )?;
//!
//!     engine.run_continuous()?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cancel;
pub mod config;
pub mod geo;
pub mod index;
pub mod mirror;
pub mod model;
pub mod orchestrator;
pub mod plan;
pub mod sources;

// Re-export top-level types for convenience
pub use archive::{ArchiveError, ArchiveWriter, RescanOptions, RescanReport};
pub use cancel::CancelToken;
pub use config::{generate_default_config, Config, ConfigError};
pub use index::{CompactionStats, IndexError, QueryOutcome, RetryPolicy, TimeSeriesIndex};
pub use mirror::MirrorBackend;
pub use model::{
    ArchiveInterval, ArrivalRecord, Catalog, Coverage, Event, Inventory, Nslc, Request, Trace,
};
pub use orchestrator::{RunOutcome, RunReport, SyncEngine, SyncError};
pub use plan::{
    combine_requests, plan_continuous, plan_event, prune_requests, ChannelPreference, EventPlan,
    EventPlanOptions, PlanError,
};
pub use sources::{
    ClientTable, Credential, DirectoryService, SourceError, TravelTimeModel, WaveformConnector,
    WaveformSource,
};
