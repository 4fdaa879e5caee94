//! Outbound clients used by enrichers, behind small traits so the chain can
//! be exercised without the network.
//!
//! All calls carry their own timeout, kept strictly below the bus ack
//! deadline so a slow upstream degrades one enricher instead of timing out
//! the whole chain.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use stride_types::{GeoPoint, StandardizedActivity};

const CALL_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Weather
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub temperature_c: f64,
    pub condition: String,
    pub wind_speed_mps: f64,
}

#[async_trait]
pub trait WeatherClient: Send + Sync {
    async fn conditions_at(
        &self,
        point: GeoPoint,
        time: DateTime<Utc>,
    ) -> anyhow::Result<WeatherReport>;
}

/// Open-Meteo archive API. No key required.
pub struct OpenMeteoClient {
    client: reqwest::Client,
    base_url: String,
}

impl OpenMeteoClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(CALL_TIMEOUT).build()?,
            base_url: base_url.into(),
        })
    }
}

fn describe_weather_code(code: i64) -> &'static str {
    match code {
        0 => "clear",
        1..=3 => "partly cloudy",
        45 | 48 => "fog",
        51..=57 => "drizzle",
        61..=67 | 80..=82 => "rain",
        71..=77 | 85 | 86 => "snow",
        95..=99 => "thunderstorm",
        _ => "mixed",
    }
}

#[async_trait]
impl WeatherClient for OpenMeteoClient {
    async fn conditions_at(
        &self,
        point: GeoPoint,
        time: DateTime<Utc>,
    ) -> anyhow::Result<WeatherReport> {
        let date = time.date_naive();
        let url = format!(
            "{}/v1/archive?latitude={}&longitude={}&start_date={date}&end_date={date}&hourly=temperature_2m,weather_code,wind_speed_10m&wind_speed_unit=ms",
            self.base_url, point.lat, point.lon
        );
        let json: Value = self.client.get(&url).send().await?.json().await?;

        let hour = time.format("%H").to_string().parse::<usize>().unwrap_or(0);
        let hourly = json
            .get("hourly")
            .ok_or_else(|| anyhow::anyhow!("weather response missing hourly block"))?;
        let pick = |field: &str| -> Option<f64> {
            hourly.get(field)?.as_array()?.get(hour)?.as_f64()
        };

        let temperature_c = pick("temperature_2m")
            .ok_or_else(|| anyhow::anyhow!("weather response missing temperature"))?;
        let code = pick("weather_code").unwrap_or(-1.0) as i64;
        Ok(WeatherReport {
            temperature_c,
            condition: describe_weather_code(code).to_string(),
            wind_speed_mps: pick("wind_speed_10m").unwrap_or(0.0),
        })
    }
}

// ---------------------------------------------------------------------------
// Reverse geocoding
// ---------------------------------------------------------------------------

#[async_trait]
pub trait GeocodeClient: Send + Sync {
    /// Human-readable locality for a point, if one can be resolved.
    async fn locality(&self, point: GeoPoint) -> anyhow::Result<Option<String>>;
}

pub struct NominatimClient {
    client: reqwest::Client,
    base_url: String,
}

impl NominatimClient {
    pub fn new(base_url: impl Into<String>, user_agent: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(CALL_TIMEOUT)
                .user_agent(user_agent)
                .build()?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl GeocodeClient for NominatimClient {
    async fn locality(&self, point: GeoPoint) -> anyhow::Result<Option<String>> {
        let url = format!(
            "{}/reverse?lat={}&lon={}&format=jsonv2&zoom=14",
            self.base_url, point.lat, point.lon
        );
        let json: Value = self.client.get(&url).send().await?.json().await?;
        let address = json.get("address");
        let locality = address
            .and_then(|a| {
                a.get("suburb")
                    .or_else(|| a.get("town"))
                    .or_else(|| a.get("city"))
                    .or_else(|| a.get("village"))
            })
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        Ok(locality)
    }
}

// ---------------------------------------------------------------------------
// AI description
// ---------------------------------------------------------------------------

#[async_trait]
pub trait DescriptionModel: Send + Sync {
    async fn describe(&self, activity: &StandardizedActivity) -> anyhow::Result<String>;
}

/// Calls a chat-completion-style endpoint with a one-shot prompt built from
/// the activity summary.
pub struct HttpDescriptionModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpDescriptionModel {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(CALL_TIMEOUT).build()?,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    fn prompt_for(activity: &StandardizedActivity) -> String {
        format!(
            "Write one upbeat sentence describing this workout: type={}, distance={:.1} km, duration={:.0} min.",
            activity.activity_type.as_str(),
            activity.total_distance_m() / 1000.0,
            activity.total_elapsed_s() / 60.0
        )
    }
}

#[async_trait]
impl DescriptionModel for HttpDescriptionModel {
    async fn describe(&self, activity: &StandardizedActivity) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": Self::prompt_for(activity) }],
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("description model returned {}", resp.status());
        }
        let json: Value = resp.json().await?;
        json.pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("description model returned no content"))
    }
}

// ---------------------------------------------------------------------------
// Parkrun results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ParkrunResult {
    pub finish_position: u32,
    pub finish_time: String,
    pub event_name: Option<String>,
}

#[async_trait]
pub trait ParkrunClient: Send + Sync {
    /// The athlete's result for an event date, once the organizers have
    /// published it. `None` while results are still pending.
    async fn result_for(
        &self,
        athlete_id: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Option<ParkrunResult>>;
}

pub struct WebParkrunClient {
    client: reqwest::Client,
    base_url: String,
}

impl WebParkrunClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(CALL_TIMEOUT).build()?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ParkrunClient for WebParkrunClient {
    async fn result_for(
        &self,
        athlete_id: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Option<ParkrunResult>> {
        let url = format!("{}/athletes/{athlete_id}/results?date={date}", self.base_url);
        let resp = self.client.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            anyhow::bail!("parkrun results endpoint returned {}", resp.status());
        }
        let json: Value = resp.json().await?;
        let Some(position) = json.get("finish_position").and_then(|v| v.as_u64()) else {
            return Ok(None);
        };
        let finish_time = json
            .get("finish_time")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(Some(ParkrunResult {
            finish_position: position as u32,
            finish_time,
            event_name: json
                .get("event_name")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        }))
    }
}
