use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use stride_types::{ActivitySource, ActivityType, Session, StandardizedActivity};

use crate::{verify_signature, IngressError, SourceProvider, WebhookEvent};

/// Fitbit notifications are date-granular: the webhook names a day, and the
/// ingress service enumerates that day's activities through the SDK seam.
pub struct FitbitProvider {
    webhook_secret: String,
}

impl FitbitProvider {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
        }
    }
}

fn map_activity_type(raw: &str) -> ActivityType {
    match raw {
        "Run" | "Treadmill" => ActivityType::Run,
        "Bike" | "Outdoor Bike" | "Spinning" => ActivityType::Ride,
        "Walk" => ActivityType::Walk,
        "Hike" => ActivityType::Hike,
        "Swim" => ActivityType::Swim,
        "Weights" => ActivityType::WeightTraining,
        "Yoga" => ActivityType::Yoga,
        _ => ActivityType::Workout,
    }
}

impl SourceProvider for FitbitProvider {
    fn source(&self) -> ActivitySource {
        ActivitySource::Fitbit
    }

    fn parse_webhook(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookEvent, IngressError> {
        let signature = signature
            .ok_or_else(|| IngressError::AuthFailure("missing webhook signature".to_string()))?;
        if !verify_signature(&self.webhook_secret, body, signature) {
            return Err(IngressError::AuthFailure(format!(
                "webhook signature mismatch (presented {})",
                stride_observability::redact_secret(signature)
            )));
        }

        // Fitbit batches notifications into an array; activity syncs are
        // delivered one element at a time per subscription.
        let json: Value = serde_json::from_slice(body)
            .map_err(|e| IngressError::InvalidPayload(format!("webhook body: {e}")))?;
        let first = json
            .as_array()
            .and_then(|a| a.first())
            .ok_or_else(|| IngressError::InvalidPayload("empty notification batch".to_string()))?;

        if first.get("collectionType").and_then(|v| v.as_str()) != Some("activities") {
            return Ok(WebhookEvent::Ignored);
        }

        let owner_id = first
            .get("ownerId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| IngressError::InvalidPayload("missing ownerId".to_string()))?;
        let date = first
            .get("date")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<NaiveDate>().ok())
            .ok_or_else(|| IngressError::InvalidPayload("missing or malformed date".to_string()))?;

        Ok(WebhookEvent::Day {
            provider_user_id: owner_id.to_string(),
            date,
        })
    }

    fn map(&self, raw: &Value, user_id: &str) -> Result<StandardizedActivity, IngressError> {
        let external_id = raw
            .get("logId")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| IngressError::InvalidPayload("activity missing logId".to_string()))?;
        let start_time = raw
            .get("startTime")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<DateTime<Utc>>().ok())
            .ok_or_else(|| IngressError::InvalidPayload("activity missing startTime".to_string()))?;

        let raw_type = raw
            .get("activityName")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let session = Session {
            // Fitbit reports duration in milliseconds and distance in km.
            total_elapsed_s: raw
                .get("duration")
                .and_then(|v| v.as_f64())
                .map(|ms| ms / 1000.0)
                .unwrap_or(0.0),
            total_distance_m: raw
                .get("distance")
                .and_then(|v| v.as_f64())
                .map(|km| km * 1000.0)
                .unwrap_or(0.0),
            total_calories: raw.get("calories").and_then(|v| v.as_f64()),
            avg_heart_rate: raw
                .get("averageHeartRate")
                .and_then(|v| v.as_u64())
                .map(|v| v as u16),
            max_heart_rate: None,
            laps: Vec::new(),
            strength_sets: Vec::new(),
        };

        Ok(StandardizedActivity {
            source: ActivitySource::Fitbit,
            external_id: external_id.to_string(),
            user_id: user_id.to_string(),
            activity_type: map_activity_type(raw_type),
            name: raw
                .get("activityName")
                .and_then(|v| v.as_str())
                .unwrap_or("Workout")
                .to_string(),
            description: String::new(),
            start_time,
            sessions: vec![session],
        })
    }
}
