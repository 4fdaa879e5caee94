use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Duration;

use stride_types::EnricherKind;

use crate::{
    DeferredInput, EnrichContext, EnrichError, EnrichOutcome, Enricher, EnrichmentResult,
};

pub const PARKRUN_HEADER: &str = "🏁 Parkrun:";
pub const FIELD_FINISH_POSITION: &str = "finish_position";
pub const FIELD_FINISH_TIME: &str = "finish_time";

const AUTO_DEADLINE_HOURS: i64 = 48;

/// Attaches official parkrun results. Results are rarely published by the
/// time the activity syncs, so the first pass usually defers: the run parks
/// on a pending input which is later filled by the user, the auto-populator
/// poller, or the deadline sweeper.
pub struct ParkrunResultsEnricher;

#[async_trait]
impl Enricher for ParkrunResultsEnricher {
    fn kind(&self) -> EnricherKind {
        EnricherKind::ParkrunResults
    }

    async fn enrich(&self, ctx: &EnrichContext<'_>) -> Result<EnrichOutcome, EnrichError> {
        if let Some(input) = ctx.resolved_input {
            if input.continued_without_resolution {
                return Ok(EnrichOutcome::Skipped {
                    reason: "results never published before the deadline".to_string(),
                });
            }
            let position = input.input_data.get(FIELD_FINISH_POSITION);
            let time = input.input_data.get(FIELD_FINISH_TIME);
            let (Some(position), Some(time)) = (position, time) else {
                return Err(EnrichError::permanent(
                    "pending input resolved without required parkrun fields",
                ));
            };

            let mut metadata = HashMap::new();
            metadata.insert("parkrun_position".to_string(), position.clone());
            metadata.insert("parkrun_time".to_string(), time.clone());
            let event = input.provider_metadata.get("event_name");
            let line = match event {
                Some(event) => format!("{event} — P{position} in {time}"),
                None => format!("P{position} in {time}"),
            };
            return Ok(EnrichOutcome::Applied(EnrichmentResult {
                section_header: Some(PARKRUN_HEADER.to_string()),
                description: Some(line),
                metadata,
                ..Default::default()
            }));
        }

        let mut provider_metadata = HashMap::new();
        provider_metadata.insert(
            "event_date".to_string(),
            ctx.activity.start_time.date_naive().to_string(),
        );
        if let Some(athlete_id) = ctx.config.get("athlete_id") {
            provider_metadata.insert("athlete_id".to_string(), athlete_id.clone());
        }

        Ok(EnrichOutcome::Deferred(DeferredInput {
            required_fields: vec![
                FIELD_FINISH_POSITION.to_string(),
                FIELD_FINISH_TIME.to_string(),
            ],
            auto_deadline: ctx.activity.start_time + Duration::hours(AUTO_DEADLINE_HOURS),
            provider_metadata,
        }))
    }
}
