use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use stride_types::{Destination, EnrichedActivityEvent, UserRecord};

use crate::{DestinationUploader, UploadError, UploadResult};

#[derive(Debug, Clone, Serialize)]
pub struct HevyWorkout {
    pub title: String,
    pub description: String,
    pub start_time: String,
    pub end_time: String,
    pub exercises: Vec<HevyExercise>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HevyExercise {
    pub title: String,
    pub sets: Vec<HevySet>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HevySet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
}

#[async_trait]
pub trait HevyApi: Send + Sync {
    async fn create_workout(&self, api_key: &str, workout: &HevyWorkout)
        -> Result<String, UploadError>;
}

/// Uploads strength sessions to Hevy. Cardio-only activities are recorded
/// as SKIPPED rather than failed so mixed pipelines still reach SYNCED.
pub struct HevyUploader {
    api: Arc<dyn HevyApi>,
}

impl HevyUploader {
    pub fn new(api: Arc<dyn HevyApi>) -> Self {
        Self { api }
    }

    fn workout_from(event: &EnrichedActivityEvent) -> Option<HevyWorkout> {
        let activity = event.activity.as_ref()?;
        let mut exercises: Vec<HevyExercise> = Vec::new();
        for set in activity.sessions.iter().flat_map(|s| &s.strength_sets) {
            let hevy_set = HevySet {
                reps: set.repetitions,
                weight_kg: set.weight_kg,
                duration_seconds: set.duration_s.map(|d| d as u64),
            };
            match exercises.iter_mut().find(|e| e.title == set.exercise) {
                Some(exercise) => exercise.sets.push(hevy_set),
                None => exercises.push(HevyExercise {
                    title: set.exercise.clone(),
                    sets: vec![hevy_set],
                }),
            }
        }
        if exercises.is_empty() {
            return None;
        }

        let end_time = activity.start_time
            + chrono::Duration::seconds(activity.total_elapsed_s() as i64);
        Some(HevyWorkout {
            title: activity.name.clone(),
            description: activity.description.clone(),
            start_time: activity.start_time.to_rfc3339(),
            end_time: end_time.to_rfc3339(),
            exercises,
        })
    }
}

#[async_trait]
impl DestinationUploader for HevyUploader {
    fn destination(&self) -> Destination {
        Destination::Hevy
    }

    async fn upload(
        &self,
        user: &UserRecord,
        event: &EnrichedActivityEvent,
    ) -> Result<UploadResult, UploadError> {
        let api_key = user
            .integration(Destination::Hevy.as_str())
            .and_then(|i| i.api_key.as_deref())
            .ok_or_else(|| UploadError::Permanent("no hevy api key configured".to_string()))?;

        let Some(workout) = Self::workout_from(event) else {
            return Err(UploadError::Skipped(
                "no strength sets in activity".to_string(),
            ));
        };

        let workout_id = self.api.create_workout(api_key, &workout).await?;
        Ok(UploadResult {
            external_id: workout_id,
        })
    }
}

/// Thin reqwest client over the Hevy public API.
pub struct HttpHevyApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHevyApi {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(20))
                .build()?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl HevyApi for HttpHevyApi {
    async fn create_workout(
        &self,
        api_key: &str,
        workout: &HevyWorkout,
    ) -> Result<String, UploadError> {
        let resp = self
            .client
            .post(format!("{}/v1/workouts", self.base_url))
            .header("api-key", api_key)
            .json(&serde_json::json!({ "workout": workout }))
            .send()
            .await
            .map_err(|e| UploadError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                UploadError::Transient(format!("hevy returned {status}: {body}"))
            } else {
                UploadError::Permanent(format!("hevy returned {status}: {body}"))
            });
        }
        let json: Value = resp
            .json()
            .await
            .map_err(|e| UploadError::Transient(e.to_string()))?;
        json.get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| UploadError::Permanent("workout response missing id".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use stride_types::{
        ActivitySource, ActivityType, Session, StandardizedActivity, StrengthSet,
    };

    fn lift_event(sets: Vec<StrengthSet>) -> EnrichedActivityEvent {
        EnrichedActivityEvent {
            pipeline_id: "p1".to_string(),
            pipeline_execution_id: "exec-1".to_string(),
            user_id: "u1".to_string(),
            activity: Some(StandardizedActivity {
                source: ActivitySource::Mobile,
                external_id: "m1".to_string(),
                user_id: "u1".to_string(),
                activity_type: ActivityType::WeightTraining,
                name: "Push day".to_string(),
                description: String::new(),
                start_time: Utc.with_ymd_and_hms(2026, 2, 8, 18, 0, 0).unwrap(),
                sessions: vec![Session {
                    total_elapsed_s: 3600.0,
                    total_distance_m: 0.0,
                    total_calories: None,
                    avg_heart_rate: None,
                    max_heart_rate: None,
                    laps: Vec::new(),
                    strength_sets: sets,
                }],
            }),
            activity_data_uri: None,
            applied_enrichments: Vec::new(),
            metadata: Default::default(),
            destinations: vec![Destination::Hevy],
            tags: Vec::new(),
            time_markers: Vec::new(),
        }
    }

    fn set(exercise: &str, reps: u32, weight: f64) -> StrengthSet {
        StrengthSet {
            exercise: exercise.to_string(),
            repetitions: Some(reps),
            weight_kg: Some(weight),
            duration_s: None,
        }
    }

    #[test]
    fn groups_sets_by_exercise() {
        let event = lift_event(vec![
            set("Bench Press", 8, 80.0),
            set("Bench Press", 6, 85.0),
            set("Overhead Press", 10, 40.0),
        ]);
        let workout = HevyUploader::workout_from(&event).unwrap();
        assert_eq!(workout.exercises.len(), 2);
        assert_eq!(workout.exercises[0].title, "Bench Press");
        assert_eq!(workout.exercises[0].sets.len(), 2);
        assert_eq!(workout.end_time, "2026-02-08T19:00:00+00:00");
    }

    #[test]
    fn cardio_only_event_yields_no_workout() {
        let event = lift_event(Vec::new());
        assert!(HevyUploader::workout_from(&event).is_none());
    }
}
