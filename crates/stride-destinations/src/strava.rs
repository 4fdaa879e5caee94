use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use stride_enrichers::apply_section;
use stride_ingress::TokenSource;
use stride_types::{ActivitySource, Destination, EnrichedActivityEvent, UserRecord};

use crate::{DestinationUploader, UploadError, UploadResult};

const UPLOAD_POLL_TIMEOUT: Duration = Duration::from_secs(15);
const UPLOAD_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Serialize)]
pub struct StravaCreateRequest {
    pub name: String,
    pub description: String,
    pub sport_type: String,
    pub start_date_local: String,
    pub elapsed_time: u64,
    pub distance: f64,
}

#[derive(Debug, Clone)]
pub struct StravaUploadStatus {
    /// Non-zero once the remote processing job has finished.
    pub activity_id: Option<u64>,
    pub error: Option<String>,
}

/// The slice of the Strava API the uploader needs, seamed for tests.
#[async_trait]
pub trait StravaApi: Send + Sync {
    async fn create_activity(
        &self,
        token: &str,
        request: &StravaCreateRequest,
    ) -> Result<u64, UploadError>;

    /// Start a file-backed upload job. Returns the upload id to poll.
    async fn start_upload(&self, token: &str, fit_data: Vec<u8>) -> Result<u64, UploadError>;

    async fn check_upload(&self, token: &str, upload_id: u64) -> Result<StravaUploadStatus, UploadError>;

    async fn get_description(&self, token: &str, activity_id: u64) -> Result<String, UploadError>;

    async fn update_activity(
        &self,
        token: &str,
        activity_id: u64,
        name: &str,
        description: &str,
    ) -> Result<(), UploadError>;
}

fn sport_type_for(event: &EnrichedActivityEvent) -> &'static str {
    use stride_types::ActivityType::*;
    match event.activity.as_ref().map(|a| a.activity_type) {
        Some(Run) => "Run",
        Some(Ride) => "Ride",
        Some(Walk) => "Walk",
        Some(Hike) => "Hike",
        Some(Swim) => "Swim",
        Some(Row) => "Rowing",
        Some(WeightTraining) => "WeightTraining",
        Some(Yoga) => "Yoga",
        Some(Workout) | None => "Workout",
    }
}

/// Uploads enriched activities to Strava. Activities that originated on
/// Strava, and reruns flagged `use_update_method`, are patched in place
/// with section-aware description merging; everything else is created new.
pub struct StravaUploader {
    api: Arc<dyn StravaApi>,
    tokens: Arc<dyn TokenSource>,
}

impl StravaUploader {
    pub fn new(api: Arc<dyn StravaApi>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            api,
            tokens,
        }
    }

    async fn token_for(&self, user: &UserRecord) -> Result<String, UploadError> {
        self.tokens
            .bearer_token(&user.user_id, Destination::Strava.as_str())
            .await
            .map_err(|e| UploadError::Permanent(format!("no strava token: {e}")))
    }

    /// Merge our sectioned description into the remote one, replacing
    /// matching sections and appending new ones. Freeform remote text the
    /// athlete wrote on Strava survives.
    fn merge_descriptions(remote: &str, local: &str) -> String {
        let mut merged = remote.to_string();
        for paragraph in local.split("\n\n").filter(|p| !p.trim().is_empty()) {
            let (header, body) = match paragraph.split_once('\n') {
                Some((header, body)) => (header, body),
                None => (paragraph, ""),
            };
            merged = apply_section(&merged, header, body);
        }
        merged
    }

    async fn update_in_place(
        &self,
        token: &str,
        activity_id: u64,
        event: &EnrichedActivityEvent,
    ) -> Result<UploadResult, UploadError> {
        let activity = event
            .activity
            .as_ref()
            .ok_or_else(|| UploadError::Permanent("event missing activity".to_string()))?;
        let remote = self.api.get_description(token, activity_id).await?;
        let merged = Self::merge_descriptions(&remote, &activity.description);
        self.api
            .update_activity(token, activity_id, &activity.name, &merged)
            .await?;
        Ok(UploadResult {
            external_id: activity_id.to_string(),
        })
    }

    async fn create_new(
        &self,
        token: &str,
        event: &EnrichedActivityEvent,
    ) -> Result<UploadResult, UploadError> {
        let activity = event
            .activity
            .as_ref()
            .ok_or_else(|| UploadError::Permanent("event missing activity".to_string()))?;
        let has_samples = activity
            .sessions
            .iter()
            .flat_map(|s| &s.laps)
            .any(|l| !l.records.is_empty());

        if has_samples {
            // File-backed path: hand the sample stream to Strava's upload
            // processor and poll until it assigns an activity id.
            let fit_data = serde_json::to_vec(activity)
                .map_err(|e| UploadError::Permanent(format!("encode upload body: {e}")))?;
            let upload_id = self.api.start_upload(token, fit_data).await?;
            let deadline = tokio::time::Instant::now() + UPLOAD_POLL_TIMEOUT;
            loop {
                let status = self.api.check_upload(token, upload_id).await?;
                if let Some(error) = status.error {
                    return Err(UploadError::Permanent(format!("upload rejected: {error}")));
                }
                if let Some(activity_id) = status.activity_id.filter(|id| *id != 0) {
                    return Ok(UploadResult {
                        external_id: activity_id.to_string(),
                    });
                }
                if tokio::time::Instant::now() >= deadline {
                    return Err(UploadError::Transient(format!(
                        "upload {upload_id} still processing after {}s",
                        UPLOAD_POLL_TIMEOUT.as_secs()
                    )));
                }
                tokio::time::sleep(UPLOAD_POLL_INTERVAL).await;
            }
        } else {
            let request = StravaCreateRequest {
                name: activity.name.clone(),
                description: activity.description.clone(),
                sport_type: sport_type_for(event).to_string(),
                start_date_local: activity.start_time.to_rfc3339(),
                elapsed_time: activity.total_elapsed_s() as u64,
                distance: activity.total_distance_m(),
            };
            let activity_id = self.api.create_activity(token, &request).await?;
            Ok(UploadResult {
                external_id: activity_id.to_string(),
            })
        }
    }

    async fn upload_once(
        &self,
        token: &str,
        event: &EnrichedActivityEvent,
    ) -> Result<UploadResult, UploadError> {
        let activity = event
            .activity
            .as_ref()
            .ok_or_else(|| UploadError::Permanent("event missing activity".to_string()))?;

        // An activity that came *from* Strava already exists there; the
        // only sensible write is a section-aware patch of its own id.
        let in_place_id = if activity.source == ActivitySource::Strava {
            activity.external_id.parse::<u64>().ok()
        } else if event.use_update_method() {
            event
                .metadata
                .get("strava_activity_id")
                .and_then(|v| v.parse().ok())
        } else {
            None
        };

        match in_place_id {
            Some(id) => self.update_in_place(token, id, event).await,
            None if event.use_update_method() => Err(UploadError::Permanent(
                "update requested but no strava activity id known".to_string(),
            )),
            None => self.create_new(token, event).await,
        }
    }

    fn sets_only(event: &EnrichedActivityEvent) -> bool {
        event
            .activity
            .as_ref()
            .map(|a| {
                a.sessions.iter().all(|s| s.total_distance_m == 0.0)
                    && a.sessions.iter().any(|s| !s.strength_sets.is_empty())
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl DestinationUploader for StravaUploader {
    fn destination(&self) -> Destination {
        Destination::Strava
    }

    async fn upload(
        &self,
        user: &UserRecord,
        event: &EnrichedActivityEvent,
    ) -> Result<UploadResult, UploadError> {
        if Self::sets_only(event) {
            return Err(UploadError::Skipped(
                "strength-only session; strava pipeline not applicable".to_string(),
            ));
        }

        let token = self.token_for(user).await?;
        match self.upload_once(&token, event).await {
            Err(UploadError::AuthExpired) => {
                // One fresh-token retry before giving up.
                debug!("strava token expired mid-upload; refreshing once");
                let token = self.token_for(user).await?;
                match self.upload_once(&token, event).await {
                    Err(UploadError::AuthExpired) => {
                        warn!("strava auth still failing after refresh");
                        Err(UploadError::Permanent("authorization expired".to_string()))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }
}

/// Thin reqwest client over api.strava.com.
pub struct HttpStravaApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStravaApi {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(20))
                .build()?,
            base_url: base_url.into(),
        })
    }

    fn classify(status: reqwest::StatusCode, body: &str) -> UploadError {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            UploadError::AuthExpired
        } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            UploadError::Transient(format!("strava returned {status}: {body}"))
        } else {
            UploadError::Permanent(format!("strava returned {status}: {body}"))
        }
    }

    async fn read_error(resp: reqwest::Response) -> UploadError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Self::classify(status, &body)
    }
}

#[async_trait]
impl StravaApi for HttpStravaApi {
    async fn create_activity(
        &self,
        token: &str,
        request: &StravaCreateRequest,
    ) -> Result<u64, UploadError> {
        let resp = self
            .client
            .post(format!("{}/api/v3/activities", self.base_url))
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(|e| UploadError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Self::read_error(resp).await);
        }
        let json: Value = resp
            .json()
            .await
            .map_err(|e| UploadError::Transient(e.to_string()))?;
        json.get("id")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| UploadError::Permanent("create response missing id".to_string()))
    }

    async fn start_upload(&self, token: &str, fit_data: Vec<u8>) -> Result<u64, UploadError> {
        let part = reqwest::multipart::Part::bytes(fit_data).file_name("activity.json");
        let form = reqwest::multipart::Form::new()
            .text("data_type", "json")
            .part("file", part);
        let resp = self
            .client
            .post(format!("{}/api/v3/uploads", self.base_url))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Self::read_error(resp).await);
        }
        let json: Value = resp
            .json()
            .await
            .map_err(|e| UploadError::Transient(e.to_string()))?;
        json.get("id")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| UploadError::Permanent("upload response missing id".to_string()))
    }

    async fn check_upload(
        &self,
        token: &str,
        upload_id: u64,
    ) -> Result<StravaUploadStatus, UploadError> {
        let resp = self
            .client
            .get(format!("{}/api/v3/uploads/{upload_id}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| UploadError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Self::read_error(resp).await);
        }
        let json: Value = resp
            .json()
            .await
            .map_err(|e| UploadError::Transient(e.to_string()))?;
        Ok(StravaUploadStatus {
            activity_id: json.get("activity_id").and_then(|v| v.as_u64()),
            error: json
                .get("error")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
        })
    }

    async fn get_description(&self, token: &str, activity_id: u64) -> Result<String, UploadError> {
        let resp = self
            .client
            .get(format!("{}/api/v3/activities/{activity_id}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| UploadError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Self::read_error(resp).await);
        }
        let json: Value = resp
            .json()
            .await
            .map_err(|e| UploadError::Transient(e.to_string()))?;
        Ok(json
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn update_activity(
        &self,
        token: &str,
        activity_id: u64,
        name: &str,
        description: &str,
    ) -> Result<(), UploadError> {
        let resp = self
            .client
            .put(format!("{}/api/v3/activities/{activity_id}", self.base_url))
            .bearer_auth(token)
            .json(&serde_json::json!({ "name": name, "description": description }))
            .send()
            .await
            .map_err(|e| UploadError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Self::read_error(resp).await);
        }
        Ok(())
    }
}
