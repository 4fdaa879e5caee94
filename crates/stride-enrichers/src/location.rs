use std::sync::Arc;

use async_trait::async_trait;
use chrono::Timelike;
use tracing::debug;

use stride_types::{ActivityType, EnricherKind};

use crate::{EnrichContext, EnrichError, EnrichOutcome, Enricher, EnrichmentResult, GeocodeClient};

/// Renames the activity after its start locality ("Morning Run in Richmond").
/// Config keys: `rename=false` keeps the original name and only attaches
/// metadata.
pub struct LocationNameEnricher {
    client: Arc<dyn GeocodeClient>,
}

impl LocationNameEnricher {
    pub fn new(client: Arc<dyn GeocodeClient>) -> Self {
        Self { client }
    }
}

fn time_of_day(hour: u32) -> &'static str {
    match hour {
        4..=11 => "Morning",
        12..=16 => "Afternoon",
        17..=21 => "Evening",
        _ => "Night",
    }
}

fn type_label(activity_type: ActivityType) -> &'static str {
    match activity_type {
        ActivityType::Run => "Run",
        ActivityType::Ride => "Ride",
        ActivityType::Walk => "Walk",
        ActivityType::Hike => "Hike",
        ActivityType::Swim => "Swim",
        ActivityType::Row => "Row",
        ActivityType::WeightTraining => "Lift",
        ActivityType::Yoga => "Yoga",
        ActivityType::Workout => "Workout",
    }
}

#[async_trait]
impl Enricher for LocationNameEnricher {
    fn kind(&self) -> EnricherKind {
        EnricherKind::LocationName
    }

    async fn enrich(&self, ctx: &EnrichContext<'_>) -> Result<EnrichOutcome, EnrichError> {
        let Some(point) = ctx.activity.first_position() else {
            return Ok(EnrichOutcome::Skipped {
                reason: "activity has no GPS data".to_string(),
            });
        };

        let locality = match self.client.locality(point).await {
            Ok(Some(locality)) => locality,
            Ok(None) => {
                return Ok(EnrichOutcome::Skipped {
                    reason: "no locality for position".to_string(),
                })
            }
            Err(e) if ctx.do_not_retry => {
                debug!("geocode failed on final pass, continuing without: {e}");
                return Ok(EnrichOutcome::Skipped {
                    reason: format!("geocoding unavailable: {e}"),
                });
            }
            Err(e) => return Err(EnrichError::transient(format!("reverse geocode: {e}"))),
        };

        let mut result = EnrichmentResult::default();
        result
            .metadata
            .insert("location_name".to_string(), locality.clone());
        let rename = ctx
            .config
            .get("rename")
            .map(|v| v != "false")
            .unwrap_or(true);
        if rename {
            result.name = Some(format!(
                "{} {} in {locality}",
                time_of_day(ctx.activity.start_time.hour()),
                type_label(ctx.activity.activity_type),
            ));
        }
        Ok(EnrichOutcome::Applied(result))
    }
}
