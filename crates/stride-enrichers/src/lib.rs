//! Pluggable enrichers for Stride pipelines.
//!
//! Each enricher implements the [`Enricher`] trait and is registered by the
//! engine at startup into an [`EnricherRegistry`]; pipelines reference them
//! by their stable kind. Enrichers that need rolling per-user state go
//! through the narrow [`BoosterState`] seam, and enrichers that call the
//! outside world take a client trait so tests can substitute fakes.

mod ai_description;
mod branding;
mod clients;
mod context;
mod effort;
mod intervals;
mod location;
mod parkrun;
mod records;
mod registry;
mod sections;
mod streak;
mod weather;

pub use ai_description::AiDescriptionEnricher;
pub use branding::BrandingEnricher;
pub use clients::{
    DescriptionModel, GeocodeClient, HttpDescriptionModel, NominatimClient, OpenMeteoClient,
    ParkrunClient, ParkrunResult, WeatherClient, WeatherReport, WebParkrunClient,
};
pub use context::{
    BoosterState, DeferredInput, EnrichContext, EnrichError, EnrichOutcome, EnrichmentResult,
    MemoryBoosterState,
};
pub use effort::EffortScoreEnricher;
pub use intervals::IntervalsEnricher;
pub use location::LocationNameEnricher;
pub use parkrun::ParkrunResultsEnricher;
pub use records::PersonalRecordsEnricher;
pub use registry::EnricherRegistry;
pub use sections::{apply_section, append_paragraph};
pub use streak::StreakTrackerEnricher;
pub use weather::WeatherEnricher;

use async_trait::async_trait;
use stride_types::EnricherKind;

/// A pluggable pipeline step that augments the canonical activity.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Stable name, used in booster executions and applied-enrichment lists.
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    fn kind(&self) -> EnricherKind;

    async fn enrich(&self, ctx: &EnrichContext<'_>) -> Result<EnrichOutcome, EnrichError>;
}
