use chrono::{DateTime, Utc};
use serde_json::Value;

use stride_types::{
    ActivitySource, ActivityType, Lap, LapIntensity, Session, StandardizedActivity,
};

use crate::{verify_signature, IngressError, SourceProvider, WebhookEvent};

/// Strava push webhooks: each event names one activity by id; the detail is
/// fetched through the SDK seam.
pub struct StravaProvider {
    webhook_secret: String,
}

impl StravaProvider {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
        }
    }
}

fn map_activity_type(raw: &str) -> ActivityType {
    match raw {
        "Run" | "TrailRun" | "VirtualRun" => ActivityType::Run,
        "Ride" | "VirtualRide" | "GravelRide" | "MountainBikeRide" => ActivityType::Ride,
        "Walk" => ActivityType::Walk,
        "Hike" => ActivityType::Hike,
        "Swim" => ActivityType::Swim,
        "Rowing" => ActivityType::Row,
        "WeightTraining" => ActivityType::WeightTraining,
        "Yoga" => ActivityType::Yoga,
        _ => ActivityType::Workout,
    }
}

fn map_laps(raw: &Value) -> Vec<Lap> {
    let Some(laps) = raw.get("laps").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    laps.iter()
        .map(|lap| Lap {
            // Strava laps carry no intensity; rest laps show up as
            // near-zero-distance splits.
            intensity: if lap.get("distance").and_then(|v| v.as_f64()).unwrap_or(0.0) < 10.0 {
                LapIntensity::Rest
            } else {
                LapIntensity::Active
            },
            duration_s: lap
                .get("elapsed_time")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            distance_m: lap.get("distance").and_then(|v| v.as_f64()).unwrap_or(0.0),
            records: Vec::new(),
        })
        .collect()
}

impl SourceProvider for StravaProvider {
    fn source(&self) -> ActivitySource {
        ActivitySource::Strava
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

        let json: Value = serde_json::from_slice(body)
            .map_err(|e| IngressError::InvalidPayload(format!("webhook body: {e}")))?;

        if json.get("object_type").and_then(|v| v.as_str()) != Some("activity") {
            return Ok(WebhookEvent::Ignored);
        }
        match json.get("aspect_type").and_then(|v| v.as_str()) {
            Some("create") | Some("update") => {}
            _ => return Ok(WebhookEvent::Ignored),
        }

        let object_id = json
            .get("object_id")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| IngressError::InvalidPayload("missing object_id".to_string()))?;
        let owner_id = json
            .get("owner_id")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| IngressError::InvalidPayload("missing owner_id".to_string()))?;

        Ok(WebhookEvent::Activity {
            provider_user_id: owner_id.to_string(),
            external_id: object_id.to_string(),
        })
    }

    fn map(&self, raw: &Value, user_id: &str) -> Result<StandardizedActivity, IngressError> {
        let external_id = raw
            .get("id")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| IngressError::InvalidPayload("activity missing id".to_string()))?;
        let start_time = raw
            .get("start_date")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<DateTime<Utc>>().ok())
            .ok_or_else(|| IngressError::InvalidPayload("activity missing start_date".to_string()))?;

        let raw_type = raw
            .get("sport_type")
            .or_else(|| raw.get("type"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let session = Session {
            total_elapsed_s: raw
                .get("elapsed_time")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            total_distance_m: raw.get("distance").and_then(|v| v.as_f64()).unwrap_or(0.0),
            total_calories: raw.get("calories").and_then(|v| v.as_f64()),
            avg_heart_rate: raw
                .get("average_heartrate")
                .and_then(|v| v.as_f64())
                .map(|v| v.round() as u16),
            max_heart_rate: raw
                .get("max_heartrate")
                .and_then(|v| v.as_f64())
                .map(|v| v.round() as u16),
            laps: map_laps(raw),
            strength_sets: Vec::new(),
        };

        Ok(StandardizedActivity {
            source: ActivitySource::Strava,
            external_id: external_id.to_string(),
            user_id: user_id.to_string(),
            activity_type: map_activity_type(raw_type),
            name: raw
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("Workout")
                .to_string(),
            description: raw
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            start_time,
            sessions: vec![session],
        })
    }
}
