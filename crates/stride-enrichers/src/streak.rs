use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use stride_types::EnricherKind;

use crate::{EnrichContext, EnrichError, EnrichOutcome, Enricher, EnrichmentResult};

const BOOSTER_ID: &str = "streak_tracker";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StreakState {
    current_streak: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_activity_date: Option<NaiveDate>,
}

/// Tracks consecutive active days per user. Redelivery-safe: an activity on
/// a date already counted leaves the persisted state untouched.
pub struct StreakTrackerEnricher;

#[async_trait]
impl Enricher for StreakTrackerEnricher {
    fn kind(&self) -> EnricherKind {
        EnricherKind::StreakTracker
    }

    async fn enrich(&self, ctx: &EnrichContext<'_>) -> Result<EnrichOutcome, EnrichError> {
        let today = ctx.activity.start_time.date_naive();

        let mut state: StreakState = match ctx.state.get(&ctx.user.user_id, BOOSTER_ID).await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_default(),
            Ok(None) => StreakState::default(),
            Err(e) => return Err(EnrichError::transient(format!("streak state read: {e}"))),
        };

        let changed = match state.last_activity_date {
            Some(last) if last == today => false,
            Some(last) if today - last == Duration::days(1) => {
                state.current_streak += 1;
                state.last_activity_date = Some(today);
                true
            }
            _ => {
                state.current_streak = 1;
                state.last_activity_date = Some(today);
                true
            }
        };

        let streak = state.current_streak.max(1);

        if changed {
            let value = serde_json::to_value(&state)
                .map_err(|e| EnrichError::permanent(format!("streak state encode: {e}")))?;
            if let Err(e) = ctx.state.set(&ctx.user.user_id, BOOSTER_ID, value).await {
                return Err(EnrichError::transient(format!("streak state write: {e}")));
            }
        }

        let mut result = EnrichmentResult::default();
        result
            .metadata
            .insert("streak_current".to_string(), streak.to_string());
        if ctx.config_flag("show_section") {
            result.section_header = Some("🔥 Streak:".to_string());
            result.description = Some(format!("{streak} day{}", if streak == 1 { "" } else { "s" }));
        }
        Ok(EnrichOutcome::Applied(result))
    }
}
