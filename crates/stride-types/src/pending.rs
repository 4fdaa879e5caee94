use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::EnricherKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingInputStatus {
    Waiting,
    Completed,
}

/// The parked state of a pipeline run awaiting asynchronous external data.
///
/// Created by an enricher that cannot complete synchronously. Completed by
/// user resolution, by the auto-populator, or by the deadline sweeper once
/// `auto_deadline` passes. Completion triggers a resume of the run from the
/// originating enricher forward. Identity is the activity id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingInput {
    pub activity_id: String,
    pub user_id: String,
    pub status: PendingInputStatus,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub input_data: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auto_populated: bool,
    #[serde(default)]
    pub continued_without_resolution: bool,
    pub enricher: EnricherKind,
    pub auto_deadline: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_execution_id: Option<String>,
    pub pipeline_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_payload_uri: Option<String>,
    #[serde(default)]
    pub provider_metadata: HashMap<String, String>,
}

impl PendingInput {
    pub fn is_waiting(&self) -> bool {
        self.status == PendingInputStatus::Waiting
    }

    /// All required fields present in `input_data`.
    pub fn is_satisfied(&self) -> bool {
        self.required_fields
            .iter()
            .all(|f| self.input_data.contains_key(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiting() -> PendingInput {
        PendingInput {
            activity_id: "strava:42".to_string(),
            user_id: "u1".to_string(),
            status: PendingInputStatus::Waiting,
            required_fields: vec!["finish_position".to_string(), "finish_time".to_string()],
            input_data: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
            auto_populated: false,
            continued_without_resolution: false,
            enricher: EnricherKind::ParkrunResults,
            auto_deadline: Utc::now(),
            linked_execution_id: Some("exec-1".to_string()),
            pipeline_id: "p1".to_string(),
            original_payload_uri: None,
            provider_metadata: HashMap::new(),
        }
    }

    #[test]
    fn satisfied_only_when_every_required_field_present() {
        let mut input = waiting();
        assert!(!input.is_satisfied());
        input
            .input_data
            .insert("finish_position".to_string(), "12".to_string());
        assert!(!input.is_satisfied());
        input
            .input_data
            .insert("finish_time".to_string(), "21:43".to_string());
        assert!(input.is_satisfied());
    }
}
