use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use stride_types::EnricherKind;

use crate::{EnrichContext, EnrichError, EnrichOutcome, Enricher, EnrichmentResult};

const BOOSTER_ID: &str = "personal_records";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TypeBests {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    longest_distance_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    longest_distance_activity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    longest_duration_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    longest_duration_activity: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecordsState {
    #[serde(default)]
    bests: HashMap<String, TypeBests>,
}

/// Personal-record tracking per activity type. A record counts as "already
/// held" by the incoming activity on redelivery, so state never regresses
/// and the announcement stays stable.
pub struct PersonalRecordsEnricher;

#[async_trait]
impl Enricher for PersonalRecordsEnricher {
    fn kind(&self) -> EnricherKind {
        EnricherKind::PersonalRecords
    }

    async fn enrich(&self, ctx: &EnrichContext<'_>) -> Result<EnrichOutcome, EnrichError> {
        let activity_id = ctx.activity.identity_key();
        let distance = ctx.activity.total_distance_m();
        let duration = ctx.activity.total_elapsed_s();
        if distance <= 0.0 && duration <= 0.0 {
            return Ok(EnrichOutcome::Skipped {
                reason: "activity has no distance or duration".to_string(),
            });
        }

        let mut state: RecordsState = match ctx.state.get(&ctx.user.user_id, BOOSTER_ID).await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_default(),
            Ok(None) => RecordsState::default(),
            Err(e) => return Err(EnrichError::transient(format!("records state read: {e}"))),
        };

        let bests = state
            .bests
            .entry(ctx.activity.activity_type.as_str().to_string())
            .or_default();

        let mut announcements = Vec::new();
        let mut metadata = HashMap::new();
        let mut changed = false;

        let distance_held = bests.longest_distance_activity.as_deref() == Some(&activity_id);
        if distance > 0.0 && (distance_held || bests.longest_distance_m.unwrap_or(0.0) < distance) {
            if !distance_held {
                bests.longest_distance_m = Some(distance);
                bests.longest_distance_activity = Some(activity_id.clone());
                changed = true;
            }
            announcements.push(format!(
                "Longest {}: {:.1} km",
                ctx.activity.activity_type.as_str(),
                distance / 1000.0
            ));
            metadata.insert("pr_longest_distance".to_string(), format!("{distance:.0}"));
        }

        let duration_held = bests.longest_duration_activity.as_deref() == Some(&activity_id);
        if duration > 0.0 && (duration_held || bests.longest_duration_s.unwrap_or(0.0) < duration) {
            if !duration_held {
                bests.longest_duration_s = Some(duration);
                bests.longest_duration_activity = Some(activity_id.clone());
                changed = true;
            }
            announcements.push(format!("Longest time on feet: {:.0} min", duration / 60.0));
            metadata.insert("pr_longest_duration".to_string(), format!("{duration:.0}"));
        }

        if changed {
            let value = serde_json::to_value(&state)
                .map_err(|e| EnrichError::permanent(format!("records state encode: {e}")))?;
            if let Err(e) = ctx.state.set(&ctx.user.user_id, BOOSTER_ID, value).await {
                return Err(EnrichError::transient(format!("records state write: {e}")));
            }
        }

        if announcements.is_empty() {
            return Ok(EnrichOutcome::Skipped {
                reason: "no personal record beaten".to_string(),
            });
        }

        Ok(EnrichOutcome::Applied(EnrichmentResult {
            section_header: Some("🏆 Personal records:".to_string()),
            description: Some(announcements.join("\n")),
            metadata,
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BoosterState;
    use crate::MemoryBoosterState;
    use chrono::{TimeZone, Utc};
    use stride_types::{ActivitySource, ActivityType, Session, StandardizedActivity, UserRecord};

    fn activity(external_id: &str, distance_m: f64) -> StandardizedActivity {
        StandardizedActivity {
            source: ActivitySource::Strava,
            external_id: external_id.to_string(),
            user_id: "u1".to_string(),
            activity_type: ActivityType::Run,
            name: "Run".to_string(),
            description: String::new(),
            start_time: Utc.with_ymd_and_hms(2026, 2, 8, 7, 0, 0).unwrap(),
            sessions: vec![Session {
                total_elapsed_s: distance_m / 3.0,
                total_distance_m: distance_m,
                total_calories: None,
                avg_heart_rate: None,
                max_heart_rate: None,
                laps: Vec::new(),
                strength_sets: Vec::new(),
            }],
        }
    }

    async fn run(state: &MemoryBoosterState, a: &StandardizedActivity) -> EnrichOutcome {
        let user = UserRecord::new("u1", Utc::now());
        let config = HashMap::new();
        let ctx = EnrichContext {
            activity: a,
            user: &user,
            config: &config,
            do_not_retry: false,
            resolved_input: None,
            state,
        };
        PersonalRecordsEnricher.enrich(&ctx).await.unwrap()
    }

    #[tokio::test]
    async fn first_activity_sets_the_record() {
        let state = MemoryBoosterState::new();
        let outcome = run(&state, &activity("a1", 5000.0)).await;
        let EnrichOutcome::Applied(result) = outcome else {
            panic!("expected Applied");
        };
        assert!(result.metadata.contains_key("pr_longest_distance"));
    }

    #[tokio::test]
    async fn shorter_activity_is_skipped() {
        let state = MemoryBoosterState::new();
        run(&state, &activity("a1", 10000.0)).await;
        let outcome = run(&state, &activity("a2", 5000.0)).await;
        assert!(matches!(outcome, EnrichOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn redelivery_repeats_the_announcement_without_state_change() {
        let state = MemoryBoosterState::new();
        let a = activity("a1", 5000.0);
        run(&state, &a).await;
        let before = state.get("u1", BOOSTER_ID).await.unwrap().unwrap();
        let outcome = run(&state, &a).await;
        assert!(matches!(outcome, EnrichOutcome::Applied(_)));
        let after = state.get("u1", BOOSTER_ID).await.unwrap().unwrap();
        assert_eq!(before, after);
    }
}
