use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stride_types::EnricherKind;

use crate::{EnrichContext, EnrichError, EnrichOutcome, Enricher, EnrichmentResult};

const BOOSTER_ID: &str = "effort_score";
const HISTORY_LEN: usize = 14;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EffortEntry {
    activity_id: String,
    date: NaiveDate,
    score: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EffortState {
    #[serde(default)]
    history: Vec<EffortEntry>,
}

/// Simple training-load score with a rolling 14-entry history, so the
/// metadata can say how this effort compares to the user's recent norm.
pub struct EffortScoreEnricher;

fn score_for(ctx: &EnrichContext<'_>) -> f64 {
    let minutes = ctx.activity.total_elapsed_s() / 60.0;
    let avg_hr = ctx
        .activity
        .sessions
        .iter()
        .filter_map(|s| s.avg_heart_rate)
        .max()
        .map(f64::from);
    match avg_hr {
        // Banister-style TRIMP approximation against a nominal 60 rest /
        // 190 max heart rate.
        Some(hr) => minutes * ((hr - 60.0) / 130.0).clamp(0.1, 1.5),
        None => minutes * 0.5 + ctx.activity.total_distance_m() / 1000.0,
    }
}

#[async_trait]
impl Enricher for EffortScoreEnricher {
    fn kind(&self) -> EnricherKind {
        EnricherKind::EffortScore
    }

    async fn enrich(&self, ctx: &EnrichContext<'_>) -> Result<EnrichOutcome, EnrichError> {
        let activity_id = ctx.activity.identity_key();
        let score = score_for(ctx);

        let mut state: EffortState = match ctx.state.get(&ctx.user.user_id, BOOSTER_ID).await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_default(),
            Ok(None) => EffortState::default(),
            Err(e) => return Err(EnrichError::transient(format!("effort state read: {e}"))),
        };

        // Baseline excludes the incoming activity, including on redelivery.
        let baseline: Vec<f64> = state
            .history
            .iter()
            .filter(|e| e.activity_id != activity_id)
            .map(|e| e.score)
            .collect();
        let relative = if baseline.is_empty() {
            1.0
        } else {
            score / (baseline.iter().sum::<f64>() / baseline.len() as f64)
        };

        if !state.history.iter().any(|e| e.activity_id == activity_id) {
            state.history.push(EffortEntry {
                activity_id: activity_id.clone(),
                date: ctx.activity.start_time.date_naive(),
                score,
            });
            if state.history.len() > HISTORY_LEN {
                let excess = state.history.len() - HISTORY_LEN;
                state.history.drain(..excess);
            }
            let value = serde_json::to_value(&state)
                .map_err(|e| EnrichError::permanent(format!("effort state encode: {e}")))?;
            if let Err(e) = ctx.state.set(&ctx.user.user_id, BOOSTER_ID, value).await {
                return Err(EnrichError::transient(format!("effort state write: {e}")));
            }
        }

        let mut result = EnrichmentResult::default();
        result
            .metadata
            .insert("effort_score".to_string(), format!("{score:.0}"));
        result
            .metadata
            .insert("effort_relative".to_string(), format!("{relative:.2}"));
        Ok(EnrichOutcome::Applied(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BoosterState;
    use crate::MemoryBoosterState;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use stride_types::{ActivitySource, ActivityType, Session, StandardizedActivity, UserRecord};

    fn activity(external_id: &str, minutes: f64, avg_hr: Option<u16>) -> StandardizedActivity {
        StandardizedActivity {
            source: ActivitySource::Strava,
            external_id: external_id.to_string(),
            user_id: "u1".to_string(),
            activity_type: ActivityType::Run,
            name: "Run".to_string(),
            description: String::new(),
            start_time: Utc.with_ymd_and_hms(2026, 2, 8, 7, 0, 0).unwrap(),
            sessions: vec![Session {
                total_elapsed_s: minutes * 60.0,
                total_distance_m: 5000.0,
                total_calories: None,
                avg_heart_rate: avg_hr,
                max_heart_rate: None,
                laps: Vec::new(),
                strength_sets: Vec::new(),
            }],
        }
    }

    async fn run(state: &MemoryBoosterState, a: &StandardizedActivity) -> EnrichmentResult {
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
        match EffortScoreEnricher.enrich(&ctx).await.unwrap() {
            EnrichOutcome::Applied(r) => r,
            other => panic!("expected Applied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_effort_is_relative_to_itself() {
        let state = MemoryBoosterState::new();
        let result = run(&state, &activity("a1", 45.0, Some(150))).await;
        assert_eq!(result.metadata.get("effort_relative").unwrap(), "1.00");
    }

    #[tokio::test]
    async fn redelivery_leaves_history_with_one_entry() {
        let state = MemoryBoosterState::new();
        let a = activity("a1", 45.0, Some(150));
        let first = run(&state, &a).await;
        let second = run(&state, &a).await;
        assert_eq!(first.metadata, second.metadata);

        let persisted: EffortState =
            serde_json::from_value(state.get("u1", BOOSTER_ID).await.unwrap().unwrap()).unwrap();
        assert_eq!(persisted.history.len(), 1);
    }

    #[tokio::test]
    async fn history_is_capped_at_fourteen_entries() {
        let state = MemoryBoosterState::new();
        for i in 0..20 {
            run(&state, &activity(&format!("a{i}"), 30.0, Some(140))).await;
        }
        let persisted: EffortState =
            serde_json::from_value(state.get("u1", BOOSTER_ID).await.unwrap().unwrap()).unwrap();
        assert_eq!(persisted.history.len(), HISTORY_LEN);
        // The oldest entries were evicted.
        assert_eq!(persisted.history[0].activity_id, "strava:a6");
    }

    #[tokio::test]
    async fn harder_session_reads_above_one() {
        let state = MemoryBoosterState::new();
        run(&state, &activity("easy1", 30.0, Some(120))).await;
        run(&state, &activity("easy2", 30.0, Some(120))).await;
        let hard = run(&state, &activity("hard", 60.0, Some(170))).await;
        let relative: f64 = hard
            .metadata
            .get("effort_relative")
            .unwrap()
            .parse()
            .unwrap();
        assert!(relative > 1.5, "relative effort was {relative}");
    }
}
