//! Request planning: decide what to download before touching the network
//!
//! - `continuous`: windowed requests over an inventory and a date range
//! - `event`: P-arrival-centered requests around catalog events
//! - `preferred`: channel selection when a station offers several streams
//! - `prune`: drop what the archive already holds
//! - `combine`: batch compatible requests into one fetch

mod combine;
mod continuous;
mod event;
mod preferred;
mod prune;

pub use combine::combine_requests;
pub use continuous::plan_continuous;
pub use event::{plan_event, EventPlan, EventPlanOptions};
pub use preferred::{highest_sample_rate, preferred_channels, ChannelPreference};
pub use prune::prune_requests;

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::index::IndexError;
use crate::sources::SourceError;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

pub type PlanResult<T> = Result<T, PlanError>;
