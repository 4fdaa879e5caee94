//! Destination fan-out for Stride.
//!
//! The orchestrator publishes one enriched event; every configured
//! destination has its own bus subscription wrapping a
//! [`DestinationUploader`], so destinations run and fail independently.
//! Each subscriber writes only its own outcome on the run and re-derives
//! the overall status through the reducer.

mod dispatcher;
mod hevy;
mod strava;

pub use dispatcher::{DestinationSubscriber, SyncPolicy};
pub use hevy::{HevyApi, HevyUploader, HevyWorkout, HttpHevyApi};
pub use strava::{
    HttpStravaApi, StravaApi, StravaCreateRequest, StravaUploadStatus, StravaUploader,
};

use async_trait::async_trait;
use thiserror::Error;

use stride_types::{Destination, EnrichedActivityEvent, UserRecord};

/// Upload failure classes. `Transient` nacks the driving message for
/// redelivery; `Permanent` records a FAILED outcome; `Skipped` records
/// SKIPPED (activity not applicable to this destination); `AuthExpired` is
/// retried once with a fresh token by the uploader itself.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("transient upload failure: {0}")]
    Transient(String),
    #[error("permanent upload failure: {0}")]
    Permanent(String),
    #[error("not applicable: {0}")]
    Skipped(String),
    #[error("authorization expired")]
    AuthExpired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    /// The id the destination assigned; recorded for loop prevention.
    pub external_id: String,
}

/// One destination integration.
#[async_trait]
pub trait DestinationUploader: Send + Sync {
    fn destination(&self) -> Destination;

    async fn upload(
        &self,
        user: &UserRecord,
        event: &EnrichedActivityEvent,
    ) -> Result<UploadResult, UploadError>;
}
