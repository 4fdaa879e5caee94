use async_trait::async_trait;

use stride_types::{EnricherKind, Lap, LapIntensity, TimeMarker};

use crate::{EnrichContext, EnrichError, EnrichOutcome, Enricher, EnrichmentResult};

pub const INTERVALS_HEADER: &str = "⏱️ Intervals:";

/// Renders a lap-by-lap interval breakdown and emits time markers for
/// destinations that can overlay them on graphs. Pure; needs no state and
/// no network.
pub struct IntervalsEnricher;

fn format_duration(seconds: f64) -> String {
    let total = seconds.round() as u64;
    let (m, s) = (total / 60, total % 60);
    format!("{m}:{s:02}")
}

fn format_lap(index: usize, lap: &Lap) -> String {
    if lap.distance_m >= 100.0 {
        format!(
            "{}. {:.0}m @ {}",
            index,
            lap.distance_m,
            format_duration(lap.duration_s)
        )
    } else {
        format!("{}. {} effort", index, format_duration(lap.duration_s))
    }
}

#[async_trait]
impl Enricher for IntervalsEnricher {
    fn kind(&self) -> EnricherKind {
        EnricherKind::Intervals
    }

    async fn enrich(&self, ctx: &EnrichContext<'_>) -> Result<EnrichOutcome, EnrichError> {
        let work_laps: Vec<&Lap> = ctx
            .activity
            .sessions
            .iter()
            .flat_map(|s| &s.laps)
            .filter(|l| l.intensity == LapIntensity::Active)
            .collect();

        if work_laps.len() < 2 {
            return Ok(EnrichOutcome::Skipped {
                reason: "fewer than two work intervals".to_string(),
            });
        }

        let mut lines = Vec::with_capacity(work_laps.len());
        let mut markers = Vec::with_capacity(work_laps.len());
        let mut offset = 0.0;
        let mut work_index = 0;
        for lap in ctx.activity.sessions.iter().flat_map(|s| &s.laps) {
            if lap.intensity == LapIntensity::Active {
                work_index += 1;
                lines.push(format_lap(work_index, lap));
                markers.push(TimeMarker {
                    label: format!("Interval {work_index}"),
                    start_offset_s: offset,
                    end_offset_s: Some(offset + lap.duration_s),
                });
            }
            offset += lap.duration_s;
        }

        let mut result = EnrichmentResult {
            section_header: Some(INTERVALS_HEADER.to_string()),
            description: Some(lines.join("\n")),
            time_markers: markers,
            ..Default::default()
        };
        result
            .metadata
            .insert("interval_count".to_string(), work_index.to_string());
        Ok(EnrichOutcome::Applied(result))
    }
}
