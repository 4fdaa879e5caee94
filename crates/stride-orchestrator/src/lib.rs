//! The orchestrator: consumes raw activities, resolves them against the
//! user's pipelines, drives the enricher chain, and publishes enriched
//! events for the destination dispatchers.

mod lag;
mod orchestrator;
mod reducer;
mod resume;
mod runner;

pub use lag::EnrichmentLagMonitor;
pub use orchestrator::Orchestrator;
pub use reducer::reduce_status;
pub use resume::{ParkrunAutoPopulator, PendingInputService};
pub use runner::{ChainOutput, ChainRunner, ChainVerdict, StoreBoosterState};
