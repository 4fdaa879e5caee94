//! Source ingestion for Stride.
//!
//! One provider module per upstream service. Each provider knows how to
//! verify and parse its webhook shape and how to map the provider's raw
//! activity JSON into the canonical model; the shared [`IngressService`]
//! owns user resolution, loop prevention, and publication onto the
//! raw-activity topic.

mod fitbit;
mod mobile;
mod service;
mod signature;
mod strava;

pub use fitbit::FitbitProvider;
pub use mobile::{MobileSyncRequest, MobileSyncResponse};
pub use service::{IngressOutcome, IngressService, ProviderSdk, TokenSource};
pub use signature::{hmac_sha256_hex, verify_signature};
pub use strava::StravaProvider;

use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;

use stride_types::{ActivitySource, StandardizedActivity};

/// Ingress failure classes, mapped to HTTP statuses at the server edge.
/// Only `Transient` is retryable.
#[derive(Error, Debug)]
pub enum IngressError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("authentication failure: {0}")]
    AuthFailure(String),
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("transient ingress error: {0}")]
    Transient(String),
}

/// What a webhook asked us to ingest: a specific activity, or (for
/// date-granular providers) everything on a day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    Activity {
        provider_user_id: String,
        external_id: String,
    },
    Day {
        provider_user_id: String,
        date: NaiveDate,
    },
    /// Valid but not ingestible (deletes, non-activity objects). Acked and
    /// dropped.
    Ignored,
}

/// One upstream provider: webhook protocol plus the raw→canonical mapper.
pub trait SourceProvider: Send + Sync {
    fn source(&self) -> ActivitySource;

    /// Verify authenticity and decode the webhook body. Failures here are
    /// never retried.
    fn parse_webhook(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookEvent, IngressError>;

    /// Pure mapping from the provider SDK's raw activity JSON to the
    /// canonical model. Unknown activity types map to `workout`; unknown
    /// units are dropped rather than guessed.
    fn map(&self, raw: &Value, user_id: &str) -> Result<StandardizedActivity, IngressError>;
}
