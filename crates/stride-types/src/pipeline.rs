use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ActivitySource;

/// Downstream service a pipeline publishes finished activities to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Strava,
    Hevy,
}

impl Destination {
    pub fn as_str(self) -> &'static str {
        match self {
            Destination::Strava => "strava",
            Destination::Hevy => "hevy",
        }
    }

    /// The ingress source whose webhooks echo uploads made to this
    /// destination. Used by loop prevention.
    pub fn matching_source(self) -> Option<ActivitySource> {
        match self {
            Destination::Strava => Some(ActivitySource::Strava),
            Destination::Hevy => None,
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identifier of an enricher implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnricherKind {
    StreakTracker,
    EffortScore,
    PersonalRecords,
    Intervals,
    Weather,
    LocationName,
    AiDescription,
    Branding,
    ParkrunResults,
}

impl EnricherKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EnricherKind::StreakTracker => "streak_tracker",
            EnricherKind::EffortScore => "effort_score",
            EnricherKind::PersonalRecords => "personal_records",
            EnricherKind::Intervals => "intervals",
            EnricherKind::Weather => "weather",
            EnricherKind::LocationName => "location_name",
            EnricherKind::AiDescription => "ai_description",
            EnricherKind::Branding => "branding",
            EnricherKind::ParkrunResults => "parkrun_results",
        }
    }
}

impl std::fmt::Display for EnricherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step in a pipeline's enricher chain. The config map is opaque here;
/// each enricher interprets its own keys at the edge of `enrich`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnricherConfig {
    pub kind: EnricherKind,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl EnricherConfig {
    pub fn new(kind: EnricherKind) -> Self {
        Self {
            kind,
            config: HashMap::new(),
        }
    }
}

/// A user-defined route: one source, an ordered enricher chain, and a set of
/// destinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub pipeline_id: String,
    pub display_name: String,
    pub source: ActivitySource,
    #[serde(default)]
    pub enrichers: Vec<EnricherConfig>,
    #[serde(default)]
    pub destinations: Vec<Destination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_config: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_config: Option<HashMap<String, String>>,
    #[serde(default)]
    pub disabled: bool,
}

impl PipelineConfig {
    pub fn new(display_name: impl Into<String>, source: ActivitySource) -> Self {
        Self {
            pipeline_id: Uuid::new_v4().to_string(),
            display_name: display_name.into(),
            source,
            enrichers: Vec::new(),
            destinations: Vec::new(),
            source_config: None,
            destination_config: None,
            disabled: false,
        }
    }

    /// True when this pipeline should receive an activity from `source`.
    pub fn accepts(&self, source: ActivitySource) -> bool {
        !self.disabled && self.source == source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_pipeline_accepts_nothing() {
        let mut p = PipelineConfig::new("Strava runs", ActivitySource::Strava);
        assert!(p.accepts(ActivitySource::Strava));
        assert!(!p.accepts(ActivitySource::Fitbit));
        p.disabled = true;
        assert!(!p.accepts(ActivitySource::Strava));
    }

    #[test]
    fn enricher_kind_names_are_stable() {
        assert_eq!(EnricherKind::StreakTracker.as_str(), "streak_tracker");
        assert_eq!(EnricherKind::ParkrunResults.as_str(), "parkrun_results");
        let json = serde_json::to_string(&EnricherKind::AiDescription).unwrap();
        assert_eq!(json, "\"ai_description\"");
    }
}
