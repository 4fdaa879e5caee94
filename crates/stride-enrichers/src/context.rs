use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use stride_types::{PendingInput, StandardizedActivity, TimeMarker, UserRecord};

/// Everything an enricher sees for one pass.
pub struct EnrichContext<'a> {
    /// The activity as accumulated by earlier enrichers in the chain.
    pub activity: &'a StandardizedActivity,
    pub user: &'a UserRecord,
    /// This enricher's slice of the pipeline config. Keys are interpreted
    /// by the enricher itself; the registry does not validate them.
    pub config: &'a HashMap<String, String>,
    /// Set on redelivery: the enricher gets one chance to degrade
    /// gracefully instead of asking for another retry.
    pub do_not_retry: bool,
    /// On a resume pass, the completed pending input addressed to this
    /// enricher.
    pub resolved_input: Option<&'a PendingInput>,
    pub state: &'a dyn BoosterState,
}

impl EnrichContext<'_> {
    pub fn config_flag(&self, key: &str) -> bool {
        self.config.get(key).map(|v| v == "true").unwrap_or(false)
    }
}

/// Rolling per-user state for enrichers that need it, keyed
/// `(user_id, booster_id)`. Last write wins.
#[async_trait]
pub trait BoosterState: Send + Sync {
    async fn get(&self, user_id: &str, booster_id: &str) -> anyhow::Result<Option<Value>>;
    async fn set(&self, user_id: &str, booster_id: &str, value: Value) -> anyhow::Result<()>;
}

/// In-memory booster state for tests.
#[derive(Default, Clone)]
pub struct MemoryBoosterState {
    map: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemoryBoosterState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BoosterState for MemoryBoosterState {
    async fn get(&self, user_id: &str, booster_id: &str) -> anyhow::Result<Option<Value>> {
        Ok(self
            .map
            .read()
            .await
            .get(&format!("{user_id}:{booster_id}"))
            .cloned())
    }

    async fn set(&self, user_id: &str, booster_id: &str, value: Value) -> anyhow::Result<()> {
        self.map
            .write()
            .await
            .insert(format!("{user_id}:{booster_id}"), value);
        Ok(())
    }
}

/// What an enricher contributes to the activity. The chain runner owns the
/// merge: name overwrites only when present, the description lands as a
/// section (replaced idempotently when `section_header` is set), metadata
/// merges last-write-wins, markers and tags append.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentResult {
    pub name: Option<String>,
    pub description: Option<String>,
    pub section_header: Option<String>,
    pub time_markers: Vec<TimeMarker>,
    pub metadata: HashMap<String, String>,
    pub tags: Vec<String>,
}

/// Request to park the run until external data arrives.
#[derive(Debug, Clone)]
pub struct DeferredInput {
    pub required_fields: Vec<String>,
    pub auto_deadline: DateTime<Utc>,
    pub provider_metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub enum EnrichOutcome {
    Applied(EnrichmentResult),
    Skipped { reason: String },
    Deferred(DeferredInput),
}

/// Enricher failure. `retryable` asks the runner to nack the driving
/// message so the bus redelivers it.
#[derive(Debug)]
pub struct EnrichError {
    pub message: String,
    pub retryable: bool,
}

impl EnrichError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for EnrichError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EnrichError {}
