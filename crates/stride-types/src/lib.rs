//! Shared data types for the Stride activity pipeline.
//!
//! Everything that crosses a crate boundary lives here: the canonical
//! activity model, user and pipeline records, run lifecycle documents,
//! and the payloads carried on the message bus.

mod activity;
mod message;
mod pending;
mod pipeline;
mod run;
mod user;

pub use activity::{
    ActivitySource, ActivityType, GeoPoint, Lap, LapIntensity, SampleRecord, Session,
    StandardizedActivity, StrengthSet, TimeMarker,
};
pub use message::{ActivityPayload, EnrichedActivityEvent};
pub use pending::{PendingInput, PendingInputStatus};
pub use pipeline::{Destination, EnricherConfig, EnricherKind, PipelineConfig};
pub use run::{
    BoosterExecution, BoosterStatus, DestinationOutcome, OutcomeStatus, PipelineRun, RunStatus,
    UploadedActivityRecord,
};
pub use user::{Integration, Tier, UserRecord};
