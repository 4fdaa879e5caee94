use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upstream provider an activity originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySource {
    Strava,
    Fitbit,
    Mobile,
}

impl ActivitySource {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivitySource::Strava => "strava",
            ActivitySource::Fitbit => "fitbit",
            ActivitySource::Mobile => "mobile",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "strava" => Some(ActivitySource::Strava),
            "fitbit" => Some(ActivitySource::Fitbit),
            "mobile" => Some(ActivitySource::Mobile),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActivitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical activity type. Provider-specific vocabularies are mapped into
/// this set at the ingress edge; anything unrecognized becomes `Workout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Run,
    Ride,
    Walk,
    Hike,
    Swim,
    Row,
    WeightTraining,
    Yoga,
    Workout,
}

impl ActivityType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityType::Run => "run",
            ActivityType::Ride => "ride",
            ActivityType::Walk => "walk",
            ActivityType::Hike => "hike",
            ActivityType::Swim => "swim",
            ActivityType::Row => "row",
            ActivityType::WeightTraining => "weight_training",
            ActivityType::Yoga => "yoga",
            ActivityType::Workout => "workout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// One sampled point inside a lap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<GeoPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LapIntensity {
    Active,
    Rest,
    Warmup,
    Cooldown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lap {
    pub intensity: LapIntensity,
    pub duration_s: f64,
    pub distance_m: f64,
    #[serde(default)]
    pub records: Vec<SampleRecord>,
}

/// A single strength-training set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrengthSet {
    pub exercise: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetitions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub total_elapsed_s: f64,
    pub total_distance_m: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_calories: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_heart_rate: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_heart_rate: Option<u16>,
    #[serde(default)]
    pub laps: Vec<Lap>,
    #[serde(default)]
    pub strength_sets: Vec<StrengthSet>,
}

/// A labelled span over the activity timeline, used by destinations that can
/// render graph overlays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeMarker {
    pub label: String,
    pub start_offset_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_offset_s: Option<f64>,
}

/// The canonical activity record every source maps into and every enricher
/// and destination consumes. `(source, external_id)` identifies an activity
/// globally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizedActivity {
    pub source: ActivitySource,
    pub external_id: String,
    pub user_id: String,
    pub activity_type: ActivityType,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub sessions: Vec<Session>,
}

impl StandardizedActivity {
    /// Globally unique identity of this activity.
    pub fn identity_key(&self) -> String {
        format!("{}:{}", self.source, self.external_id)
    }

    pub fn total_distance_m(&self) -> f64 {
        self.sessions.iter().map(|s| s.total_distance_m).sum()
    }

    pub fn total_elapsed_s(&self) -> f64 {
        self.sessions.iter().map(|s| s.total_elapsed_s).sum()
    }

    /// First GPS fix in record order, if the activity carries any.
    pub fn first_position(&self) -> Option<GeoPoint> {
        self.sessions
            .iter()
            .flat_map(|s| &s.laps)
            .flat_map(|l| &l.records)
            .find_map(|r| r.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn minimal(source: ActivitySource, external_id: &str) -> StandardizedActivity {
        StandardizedActivity {
            source,
            external_id: external_id.to_string(),
            user_id: "u1".to_string(),
            activity_type: ActivityType::Run,
            name: "Morning Run".to_string(),
            description: String::new(),
            start_time: Utc.with_ymd_and_hms(2026, 2, 8, 7, 30, 0).unwrap(),
            sessions: Vec::new(),
        }
    }

    #[test]
    fn identity_key_includes_source_and_external_id() {
        let a = minimal(ActivitySource::Strava, "42");
        assert_eq!(a.identity_key(), "strava:42");
        let b = minimal(ActivitySource::Fitbit, "42");
        assert_ne!(a.identity_key(), b.identity_key());
    }

    #[test]
    fn totals_sum_across_sessions() {
        let mut a = minimal(ActivitySource::Mobile, "1");
        a.sessions = vec![
            Session {
                total_elapsed_s: 600.0,
                total_distance_m: 2000.0,
                total_calories: None,
                avg_heart_rate: None,
                max_heart_rate: None,
                laps: Vec::new(),
                strength_sets: Vec::new(),
            },
            Session {
                total_elapsed_s: 300.0,
                total_distance_m: 1000.0,
                total_calories: None,
                avg_heart_rate: None,
                max_heart_rate: None,
                laps: Vec::new(),
                strength_sets: Vec::new(),
            },
        ];
        assert_eq!(a.total_distance_m(), 3000.0);
        assert_eq!(a.total_elapsed_s(), 900.0);
    }

    #[test]
    fn first_position_scans_laps_in_order() {
        let mut a = minimal(ActivitySource::Strava, "9");
        a.sessions = vec![Session {
            total_elapsed_s: 60.0,
            total_distance_m: 100.0,
            total_calories: None,
            avg_heart_rate: None,
            max_heart_rate: None,
            laps: vec![Lap {
                intensity: LapIntensity::Active,
                duration_s: 60.0,
                distance_m: 100.0,
                records: vec![
                    SampleRecord {
                        timestamp: a.start_time,
                        heart_rate: Some(120),
                        speed_mps: None,
                        altitude_m: None,
                        position: None,
                    },
                    SampleRecord {
                        timestamp: a.start_time,
                        heart_rate: None,
                        speed_mps: None,
                        altitude_m: None,
                        position: Some(GeoPoint { lat: 51.5, lon: -0.1 }),
                    },
                ],
            }],
            strength_sets: Vec::new(),
        }];
        let p = a.first_position().unwrap();
        assert_eq!(p.lat, 51.5);
    }

    #[test]
    fn serde_roundtrip_preserves_activity() {
        let a = minimal(ActivitySource::Strava, "7");
        let json = serde_json::to_string(&a).unwrap();
        let back: StandardizedActivity = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }
}
