use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ActivitySource, ActivityType, Destination};

/// Overall lifecycle status of one pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Synced,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoosterStatus {
    Success,
    Skipped,
    Failed,
}

/// Record of one enricher pass inside a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoosterExecution {
    pub provider_name: String,
    pub status: BoosterStatus,
    pub duration_ms: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Pending,
    Success,
    Failed,
    Skipped,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Pending => "pending",
            OutcomeStatus::Success => "success",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Skipped => "skipped",
        }
    }
}

/// Per-destination upload result. Each uploader writes only its own entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationOutcome {
    pub destination: Destination,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DestinationOutcome {
    pub fn pending(destination: Destination) -> Self {
        Self {
            destination,
            status: OutcomeStatus::Pending,
            external_id: None,
            error: None,
            completed_at: None,
        }
    }
}

/// Durable record of one execution attempt of one pipeline for one activity.
///
/// The id doubles as the `pipeline_execution_id` carried on bus messages.
/// Writers stay in their own lane: the chain runner appends `boosters`,
/// each destination uploader updates its own `destinations` entry, and the
/// status reducer writes `status`/`updated_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub pipeline_id: String,
    pub user_id: String,
    pub activity_id: String,
    pub source: ActivitySource,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub activity_type: ActivityType,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_input_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_payload_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enriched_event_uri: Option<String>,
    #[serde(default)]
    pub boosters: Vec<BoosterExecution>,
    #[serde(default)]
    pub destinations: Vec<DestinationOutcome>,
}

impl PipelineRun {
    pub fn outcome(&self, destination: Destination) -> Option<&DestinationOutcome> {
        self.destinations.iter().find(|o| o.destination == destination)
    }

    pub fn has_booster(&self, provider_name: &str) -> bool {
        self.boosters.iter().any(|b| b.provider_name == provider_name)
    }
}

/// Loop-prevention record: an activity we ourselves posted to a destination.
/// When a webhook later arrives whose external id matches one of these, the
/// ingress layer drops it as a bounceback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedActivityRecord {
    pub destination: Destination,
    pub destination_id: String,
    pub user_id: String,
    pub source: ActivitySource,
    pub source_external_id: String,
    pub start_time: DateTime<Utc>,
    pub uploaded_at: DateTime<Utc>,
}

impl UploadedActivityRecord {
    /// Storage key, unique per user.
    pub fn key(&self) -> String {
        Self::key_for(self.destination, &self.destination_id)
    }

    pub fn key_for(destination: Destination, destination_id: &str) -> String {
        format!("{destination}:{destination_id}")
    }
}
