use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ActivitySource, Destination, StandardizedActivity, TimeMarker};

/// Message published on the raw-activity topic by every ingress path and by
/// the resume machinery. When the serialized body would exceed the bus
/// threshold the inline activity is cleared and `activity_data_uri` points
/// at the full payload in blob storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPayload {
    pub source: ActivitySource,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<StandardizedActivity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_data_uri: Option<String>,
    #[serde(default)]
    pub is_resume: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_execution_id: Option<String>,
}

impl ActivityPayload {
    pub fn new(user_id: impl Into<String>, activity: StandardizedActivity) -> Self {
        Self {
            source: activity.source,
            user_id: user_id.into(),
            timestamp: Utc::now(),
            activity: Some(activity),
            activity_data_uri: None,
            is_resume: false,
            pipeline_execution_id: None,
        }
    }
}

/// The product of a completed enricher chain, published on the
/// enriched-activity topic and consumed once per destination subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedActivityEvent {
    pub pipeline_id: String,
    pub pipeline_execution_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<StandardizedActivity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_data_uri: Option<String>,
    #[serde(default)]
    pub applied_enrichments: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub destinations: Vec<Destination>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub time_markers: Vec<TimeMarker>,
}

impl EnrichedActivityEvent {
    /// True when the destination uploader should patch the existing upstream
    /// activity instead of creating a new one.
    pub fn use_update_method(&self) -> bool {
        self.metadata
            .get("use_update_method")
            .map(|v| v == "true")
            .unwrap_or(false)
    }
}
