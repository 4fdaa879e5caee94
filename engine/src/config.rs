use std::path::PathBuf;
use std::time::Duration;

use stride_bus::BusConfig;
use stride_destinations::SyncPolicy;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Environment-driven engine configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub state_dir: PathBuf,
    pub blob_bucket: String,
    pub offload_threshold_bytes: usize,
    pub bus_max_deliveries: u32,
    pub bus_ack_deadline: Duration,
    pub hobbyist_monthly_limit: u32,
    pub athlete_monthly_limit: u32,
    pub strava_webhook_secret: String,
    pub fitbit_webhook_secret: String,
    pub strava_api_base: String,
    pub hevy_api_base: String,
    pub weather_api_base: String,
    pub geocode_api_base: String,
    pub parkrun_api_base: String,
    pub description_model_endpoint: String,
    pub description_model_key: String,
    pub description_model_name: String,
    pub pending_sweep_interval: Duration,
    pub parkrun_trigger_interval: Duration,
    pub lag_scan_interval: Duration,
    pub lag_threshold_minutes: i64,
    pub log_retention_days: u64,
}

impl EngineConfig {
    pub fn from_env(state_dir_flag: Option<String>) -> Self {
        let state_dir = state_dir_flag
            .or_else(|| std::env::var("STRIDE_STATE_DIR").ok())
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".stride"));

        Self {
            state_dir,
            blob_bucket: env_string("STRIDE_BLOB_BUCKET", "stride"),
            offload_threshold_bytes: env_or(
                "STRIDE_OFFLOAD_THRESHOLD_BYTES",
                stride_bus::DEFAULT_OFFLOAD_THRESHOLD,
            ),
            bus_max_deliveries: env_or("STRIDE_BUS_MAX_DELIVERIES", 5),
            bus_ack_deadline: Duration::from_secs(env_or("STRIDE_BUS_ACK_DEADLINE_SECS", 30)),
            hobbyist_monthly_limit: env_or("STRIDE_HOBBYIST_MONTHLY_LIMIT", 30),
            athlete_monthly_limit: env_or("STRIDE_ATHLETE_MONTHLY_LIMIT", 1000),
            strava_webhook_secret: env_string("STRIDE_STRAVA_WEBHOOK_SECRET", ""),
            fitbit_webhook_secret: env_string("STRIDE_FITBIT_WEBHOOK_SECRET", ""),
            strava_api_base: env_string("STRIDE_STRAVA_API_BASE", "https://www.strava.com"),
            hevy_api_base: env_string("STRIDE_HEVY_API_BASE", "https://api.hevyapp.com"),
            weather_api_base: env_string(
                "STRIDE_WEATHER_API_BASE",
                "https://archive-api.open-meteo.com",
            ),
            geocode_api_base: env_string(
                "STRIDE_GEOCODE_API_BASE",
                "https://nominatim.openstreetmap.org",
            ),
            parkrun_api_base: env_string("STRIDE_PARKRUN_API_BASE", "https://results.stride.run"),
            description_model_endpoint: env_string(
                "STRIDE_MODEL_ENDPOINT",
                "https://api.openai.com/v1/chat/completions",
            ),
            description_model_key: env_string("STRIDE_MODEL_API_KEY", ""),
            description_model_name: env_string("STRIDE_MODEL_NAME", "gpt-4o-mini"),
            pending_sweep_interval: Duration::from_secs(env_or(
                "STRIDE_PENDING_SWEEP_INTERVAL_SECS",
                300,
            )),
            parkrun_trigger_interval: Duration::from_secs(env_or(
                "STRIDE_PARKRUN_TRIGGER_INTERVAL_SECS",
                1800,
            )),
            lag_scan_interval: Duration::from_secs(env_or("STRIDE_LAG_SCAN_INTERVAL_SECS", 600)),
            lag_threshold_minutes: env_or("STRIDE_LAG_THRESHOLD_MINUTES", 60),
            log_retention_days: env_or("STRIDE_LOG_RETENTION_DAYS", 14),
        }
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            max_deliveries: self.bus_max_deliveries,
            ack_deadline: self.bus_ack_deadline,
            ..BusConfig::default()
        }
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            hobbyist_monthly_limit: self.hobbyist_monthly_limit,
            athlete_monthly_limit: self.athlete_monthly_limit,
        }
    }
}
