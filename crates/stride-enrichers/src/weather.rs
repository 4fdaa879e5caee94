use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use stride_types::EnricherKind;

use crate::{EnrichContext, EnrichError, EnrichOutcome, Enricher, EnrichmentResult, WeatherClient};

pub const WEATHER_HEADER: &str = "🌤️ Weather:";

/// Attaches the conditions at the activity's start point. Upstream failures
/// are retried once via redelivery; on the do-not-retry pass the enricher
/// degrades to a skip so the chain still completes.
pub struct WeatherEnricher {
    client: Arc<dyn WeatherClient>,
}

impl WeatherEnricher {
    pub fn new(client: Arc<dyn WeatherClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Enricher for WeatherEnricher {
    fn kind(&self) -> EnricherKind {
        EnricherKind::Weather
    }

    async fn enrich(&self, ctx: &EnrichContext<'_>) -> Result<EnrichOutcome, EnrichError> {
        let Some(point) = ctx.activity.first_position() else {
            return Ok(EnrichOutcome::Skipped {
                reason: "activity has no GPS data".to_string(),
            });
        };

        let report = match self
            .client
            .conditions_at(point, ctx.activity.start_time)
            .await
        {
            Ok(report) => report,
            Err(e) if ctx.do_not_retry => {
                debug!("weather lookup failed on final pass, continuing without: {e}");
                return Ok(EnrichOutcome::Skipped {
                    reason: format!("weather unavailable: {e}"),
                });
            }
            Err(e) => return Err(EnrichError::transient(format!("weather lookup: {e}"))),
        };

        let mut result = EnrichmentResult {
            section_header: Some(WEATHER_HEADER.to_string()),
            description: Some(format!(
                "{:.0}°C, {}, wind {:.0} m/s",
                report.temperature_c, report.condition, report.wind_speed_mps
            )),
            ..Default::default()
        };
        result.metadata.insert(
            "weather_temperature_c".to_string(),
            format!("{:.1}", report.temperature_c),
        );
        result
            .metadata
            .insert("weather_condition".to_string(), report.condition);
        Ok(EnrichOutcome::Applied(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryBoosterState, WeatherReport};
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashMap;
    use stride_types::{
        ActivitySource, ActivityType, GeoPoint, Lap, LapIntensity, SampleRecord, Session,
        StandardizedActivity, UserRecord,
    };

    struct FixedWeather(Option<WeatherReport>);

    #[async_trait]
    impl WeatherClient for FixedWeather {
        async fn conditions_at(
            &self,
            _point: GeoPoint,
            _time: DateTime<Utc>,
        ) -> anyhow::Result<WeatherReport> {
            self.0.clone().ok_or_else(|| anyhow::anyhow!("upstream 503"))
        }
    }

    fn gps_activity() -> StandardizedActivity {
        let start = Utc.with_ymd_and_hms(2026, 2, 8, 7, 0, 0).unwrap();
        StandardizedActivity {
            source: ActivitySource::Strava,
            external_id: "42".to_string(),
            user_id: "u1".to_string(),
            activity_type: ActivityType::Run,
            name: "Run".to_string(),
            description: String::new(),
            start_time: start,
            sessions: vec![Session {
                total_elapsed_s: 1800.0,
                total_distance_m: 5000.0,
                total_calories: None,
                avg_heart_rate: None,
                max_heart_rate: None,
                laps: vec![Lap {
                    intensity: LapIntensity::Active,
                    duration_s: 1800.0,
                    distance_m: 5000.0,
                    records: vec![SampleRecord {
                        timestamp: start,
                        heart_rate: None,
                        speed_mps: None,
                        altitude_m: None,
                        position: Some(GeoPoint { lat: 51.5, lon: -0.1 }),
                    }],
                }],
                strength_sets: Vec::new(),
            }],
        }
    }

    async fn run(client: FixedWeather, do_not_retry: bool) -> Result<EnrichOutcome, EnrichError> {
        let a = gps_activity();
        let user = UserRecord::new("u1", Utc::now());
        let config = HashMap::new();
        let state = MemoryBoosterState::new();
        let ctx = EnrichContext {
            activity: &a,
            user: &user,
            config: &config,
            do_not_retry,
            resolved_input: None,
            state: &state,
        };
        WeatherEnricher::new(Arc::new(client)).enrich(&ctx).await
    }

    #[tokio::test]
    async fn attaches_conditions_section() {
        let outcome = run(
            FixedWeather(Some(WeatherReport {
                temperature_c: 11.6,
                condition: "partly cloudy".to_string(),
                wind_speed_mps: 4.2,
            })),
            false,
        )
        .await
        .unwrap();
        let EnrichOutcome::Applied(result) = outcome else {
            panic!("expected Applied");
        };
        assert_eq!(result.description.as_deref(), Some("12°C, partly cloudy, wind 4 m/s"));
        assert_eq!(result.metadata.get("weather_temperature_c").unwrap(), "11.6");
    }

    #[tokio::test]
    async fn upstream_failure_asks_for_retry_first() {
        let err = run(FixedWeather(None), false).await.unwrap_err();
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn degrades_to_skip_on_do_not_retry_pass() {
        let outcome = run(FixedWeather(None), true).await.unwrap();
        assert!(matches!(outcome, EnrichOutcome::Skipped { .. }));
    }
}
