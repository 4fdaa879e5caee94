use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use stride_types::StandardizedActivity;

/// Batch sync body from the phone app. Activities arrive already in the
/// canonical shape; the server stamps the authenticated user and forces the
/// source before publishing.
#[derive(Debug, Clone, Deserialize)]
pub struct MobileSyncRequest {
    pub activities: Vec<StandardizedActivity>,
    #[serde(default)]
    pub device: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileSyncResponse {
    pub success: bool,
    pub processed_count: usize,
    pub skipped_count: usize,
    pub execution_ids: Vec<String>,
    pub synced_at: DateTime<Utc>,
}
