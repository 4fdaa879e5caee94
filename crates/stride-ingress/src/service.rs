use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tracing::{info, warn, Level};

use stride_bus::{CloudEvent, MessageBus, Offloader, TOPIC_RAW_ACTIVITY};
use stride_observability::{emit_event, PipelineEvent, Stage};
use stride_store::{
    mobile_activity_key, ExecutionLog, ExecutionRecord, MetadataStore, TriggerType,
};
use stride_types::{ActivityPayload, ActivitySource, Destination};

use crate::{IngressError, MobileSyncRequest, MobileSyncResponse, SourceProvider, WebhookEvent};

/// Yields a valid bearer token for a user's provider integration. The OAuth
/// acquisition/refresh flow behind it is out of scope here.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn bearer_token(&self, user_id: &str, provider: &str) -> anyhow::Result<String>;
}

/// Typed seam over the per-provider HTTP SDKs. Returns the provider's raw
/// activity JSON; mapping to the canonical model stays in the provider.
#[async_trait]
pub trait ProviderSdk: Send + Sync {
    async fn fetch_activity(
        &self,
        user_id: &str,
        source: ActivitySource,
        external_id: &str,
    ) -> anyhow::Result<Value>;

    async fn fetch_activities_for_day(
        &self,
        user_id: &str,
        source: ActivitySource,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<Value>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressOutcome {
    Published { count: usize },
    Bounceback,
    UnknownUser,
    Ignored,
}

/// The destination whose uploads echo back through this source's webhooks.
fn bounceback_destination(source: ActivitySource) -> Option<Destination> {
    match source {
        ActivitySource::Strava => Some(Destination::Strava),
        ActivitySource::Fitbit | ActivitySource::Mobile => None,
    }
}

/// Shared ingestion flow: user resolution, loop prevention, SDK fetch,
/// canonical mapping, and publication on the raw-activity topic.
pub struct IngressService {
    store: Arc<dyn MetadataStore>,
    bus: Arc<dyn MessageBus>,
    offloader: Offloader,
    sdk: Arc<dyn ProviderSdk>,
    execution_log: Arc<ExecutionLog>,
}

impl IngressService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        bus: Arc<dyn MessageBus>,
        offloader: Offloader,
        sdk: Arc<dyn ProviderSdk>,
        execution_log: Arc<ExecutionLog>,
    ) -> Self {
        Self {
            store,
            bus,
            offloader,
            sdk,
            execution_log,
        }
    }

    pub async fn handle_webhook(
        &self,
        provider: &dyn SourceProvider,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<IngressOutcome, IngressError> {
        let source = provider.source();
        let record = ExecutionRecord::start(format!("ingress.{source}"), TriggerType::Webhook)
            .with_input(String::from_utf8_lossy(body).into_owned());

        let result = self.handle_webhook_inner(provider, signature, body).await;
        let finished = match &result {
            Ok(outcome) => record.with_outcome(outcome),
            Err(e) => record.fail(e.to_string()),
        };
        let _ = self.execution_log.append(&finished).await;
        result
    }

    async fn handle_webhook_inner(
        &self,
        provider: &dyn SourceProvider,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<IngressOutcome, IngressError> {
        let source = provider.source();
        let event = provider.parse_webhook(signature, body)?;

        let (provider_user_id, fetch) = match event {
            WebhookEvent::Ignored => return Ok(IngressOutcome::Ignored),
            WebhookEvent::Activity {
                provider_user_id,
                external_id,
            } => (provider_user_id, Fetch::ById(external_id)),
            WebhookEvent::Day {
                provider_user_id,
                date,
            } => (provider_user_id, Fetch::ByDay(date)),
        };

        let Some(user_id) = self
            .store
            .find_user_by_provider_external_id(source, &provider_user_id)
            .await
            .map_err(|e| IngressError::Transient(format!("identity lookup: {e}")))?
        else {
            info!("dropping {source} webhook for unknown provider user {provider_user_id}");
            return Ok(IngressOutcome::UnknownUser);
        };

        match fetch {
            Fetch::ById(external_id) => {
                // Bounceback check first: skip the SDK round-trip entirely
                // for activities we posted ourselves.
                if self.is_bounceback(&user_id, source, &external_id).await? {
                    info!("dropping bounceback {source}:{external_id} for {user_id}");
                    let activity_id = format!("{source}:{external_id}");
                    emit_event(
                        Level::INFO,
                        PipelineEvent {
                            user_id: Some(&user_id),
                            source: Some(source.as_str()),
                            activity_id: Some(&activity_id),
                            status: Some("dropped"),
                            ..PipelineEvent::new(Stage::Ingress, "activity.bounceback")
                        },
                    );
                    return Ok(IngressOutcome::Bounceback);
                }
                let raw = self
                    .sdk
                    .fetch_activity(&user_id, source, &external_id)
                    .await
                    .map_err(|e| IngressError::Transient(format!("sdk fetch: {e}")))?;
                let activity = provider.map(&raw, &user_id)?;
                self.publish_payload(ActivityPayload::new(&user_id, activity))
                    .await?;
                Ok(IngressOutcome::Published { count: 1 })
            }
            Fetch::ByDay(date) => {
                let raws = self
                    .sdk
                    .fetch_activities_for_day(&user_id, source, date)
                    .await
                    .map_err(|e| IngressError::Transient(format!("sdk day fetch: {e}")))?;
                let mut published = 0;
                for raw in &raws {
                    let activity = provider.map(raw, &user_id)?;
                    if self
                        .is_bounceback(&user_id, source, &activity.external_id)
                        .await?
                    {
                        continue;
                    }
                    self.publish_payload(ActivityPayload::new(&user_id, activity))
                        .await?;
                    published += 1;
                }
                Ok(IngressOutcome::Published { count: published })
            }
        }
    }

    /// Mobile batch sync. Activities are already canonical; duplicates
    /// inside the batch and records without an external id are skipped.
    pub async fn handle_mobile_sync(
        &self,
        user_id: &str,
        request: MobileSyncRequest,
    ) -> Result<MobileSyncResponse, IngressError> {
        let record = ExecutionRecord::start("ingress.mobile", TriggerType::MobileSync)
            .with_user(user_id)
            .with_input(format!("{} activities", request.activities.len()));

        let mut seen = HashSet::new();
        let mut execution_ids = Vec::new();
        let mut skipped = 0;

        for mut activity in request.activities {
            activity.source = ActivitySource::Mobile;
            activity.user_id = user_id.to_string();
            if activity.external_id.is_empty() || !seen.insert(activity.external_id.clone()) {
                skipped += 1;
                continue;
            }

            let key = mobile_activity_key(user_id, &activity.identity_key());
            self.offloader
                .write_json(&key, &activity)
                .await
                .map_err(|e| IngressError::Transient(format!("mobile activity persist: {e}")))?;

            let message_id = self
                .publish_payload(ActivityPayload::new(user_id, activity))
                .await?;
            execution_ids.push(message_id);
        }

        let response = MobileSyncResponse {
            success: true,
            processed_count: execution_ids.len(),
            skipped_count: skipped,
            execution_ids,
            synced_at: Utc::now(),
        };
        let _ = self
            .execution_log
            .append(&record.succeed(Some(format!(
                "processed={} skipped={}",
                response.processed_count, response.skipped_count
            ))))
            .await;
        Ok(response)
    }

    /// Loop-prevention query with a short backoff to tolerate
    /// read-after-write lag against an upload that may still be flushing.
    async fn is_bounceback(
        &self,
        user_id: &str,
        source: ActivitySource,
        external_id: &str,
    ) -> Result<bool, IngressError> {
        let Some(destination) = bounceback_destination(source) else {
            return Ok(false);
        };
        for (attempt, delay_ms) in [100u64, 200, 400].iter().enumerate() {
            match self
                .store
                .find_uploaded_activity(user_id, destination, external_id)
                .await
            {
                Ok(Some(_)) => return Ok(true),
                Ok(None) if attempt == 2 => return Ok(false),
                Ok(None) => tokio::time::sleep(Duration::from_millis(*delay_ms)).await,
                Err(e) => {
                    warn!("loop-prevention lookup failed (attempt {attempt}): {e}");
                    tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                }
            }
        }
        Ok(false)
    }

    /// Offload if oversized, wrap in an envelope, publish on the raw topic.
    pub async fn publish_payload(&self, payload: ActivityPayload) -> Result<String, IngressError> {
        let source = payload.source;
        let user_id = payload.user_id.clone();
        let activity_id = payload.activity.as_ref().map(|a| a.identity_key());
        let is_resume = payload.is_resume;

        let payload = self
            .offloader
            .offload_raw(payload)
            .await
            .map_err(|e| IngressError::Transient(format!("payload offload: {e}")))?;
        let event = CloudEvent::new(format!("stride.ingress.{source}"), "activity.raw", &payload)
            .map_err(|e| IngressError::Transient(format!("envelope encode: {e}")))?;
        let message_id = self
            .bus
            .publish(TOPIC_RAW_ACTIVITY, event)
            .await
            .map_err(|e| IngressError::Transient(format!("publish: {e}")))?;

        emit_event(
            Level::INFO,
            PipelineEvent {
                user_id: Some(&user_id),
                source: Some(source.as_str()),
                activity_id: activity_id.as_deref(),
                status: Some(if is_resume { "resume" } else { "new" }),
                ..PipelineEvent::new(Stage::Ingress, "activity.published")
            },
        );
        Ok(message_id)
    }
}

enum Fetch {
    ById(String),
    ByDay(NaiveDate),
}

trait WithOutcome {
    fn with_outcome(self, outcome: &IngressOutcome) -> Self;
}

impl WithOutcome for ExecutionRecord {
    fn with_outcome(self, outcome: &IngressOutcome) -> Self {
        let summary = match outcome {
            IngressOutcome::Published { count } => format!("published {count}"),
            IngressOutcome::Bounceback => "dropped bounceback".to_string(),
            IngressOutcome::UnknownUser => "dropped unknown user".to_string(),
            IngressOutcome::Ignored => "ignored".to_string(),
        };
        self.succeed(Some(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hmac_sha256_hex, StravaProvider};
    use std::sync::Mutex;
    use stride_bus::{BusConfig, InProcessBus};
    use stride_store::{JsonStore, MemoryBlobStore};
    use stride_types::{ActivityType, StandardizedActivity, UploadedActivityRecord, UserRecord};

    struct FakeSdk {
        activities: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl ProviderSdk for FakeSdk {
        async fn fetch_activity(
            &self,
            _user_id: &str,
            _source: ActivitySource,
            external_id: &str,
        ) -> anyhow::Result<Value> {
            self.activities
                .lock()
                .unwrap()
                .iter()
                .find(|a| a["id"].to_string() == external_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such activity"))
        }

        async fn fetch_activities_for_day(
            &self,
            _user_id: &str,
            _source: ActivitySource,
            _date: NaiveDate,
        ) -> anyhow::Result<Vec<Value>> {
            Ok(self.activities.lock().unwrap().clone())
        }
    }

    async fn service_with(
        dir: &tempfile::TempDir,
        activities: Vec<Value>,
    ) -> (Arc<JsonStore>, IngressService) {
        let store = Arc::new(JsonStore::new(dir.path()).await.unwrap());
        let bus = Arc::new(InProcessBus::new(BusConfig::default()));
        let offloader = Offloader::new(
            Arc::new(MemoryBlobStore::new()),
            "stride",
            stride_bus::DEFAULT_OFFLOAD_THRESHOLD,
        );
        let log = Arc::new(ExecutionLog::new(dir.path().join("executions.jsonl")));
        let service = IngressService::new(
            store.clone(),
            bus,
            offloader,
            Arc::new(FakeSdk {
                activities: Mutex::new(activities),
            }),
            log,
        );
        (store, service)
    }

    fn strava_raw(id: u64) -> Value {
        serde_json::json!({
            "id": id,
            "name": "Morning Run",
            "sport_type": "Run",
            "start_date": "2026-02-08T07:30:00Z",
            "elapsed_time": 1800.0,
            "distance": 5000.0,
        })
    }

    fn signed_create(id: u64, owner: u64) -> (Vec<u8>, String) {
        let body = serde_json::to_vec(&serde_json::json!({
            "object_type": "activity",
            "aspect_type": "create",
            "object_id": id,
            "owner_id": owner,
        }))
        .unwrap();
        let sig = hmac_sha256_hex(b"secret", &body);
        (body, sig)
    }

    #[tokio::test]
    async fn known_user_webhook_publishes_one_payload() {
        let dir = tempfile::tempdir().unwrap();
        let (store, service) = service_with(&dir, vec![strava_raw(1234567)]).await;
        store.put_user(UserRecord::new("u1", Utc::now())).await.unwrap();
        store
            .register_integration_identity(ActivitySource::Strava, "99", "u1")
            .await
            .unwrap();

        let provider = StravaProvider::new("secret");
        let (body, sig) = signed_create(1234567, 99);
        let outcome = service
            .handle_webhook(&provider, Some(&sig), &body)
            .await
            .unwrap();
        assert_eq!(outcome, IngressOutcome::Published { count: 1 });
    }

    #[tokio::test]
    async fn unknown_user_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, service) = service_with(&dir, vec![strava_raw(1)]).await;
        let provider = StravaProvider::new("secret");
        let (body, sig) = signed_create(1, 12345);
        let outcome = service
            .handle_webhook(&provider, Some(&sig), &body)
            .await
            .unwrap();
        assert_eq!(outcome, IngressOutcome::UnknownUser);
    }

    #[tokio::test]
    async fn bounceback_of_own_upload_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (store, service) = service_with(&dir, vec![strava_raw(1234567)]).await;
        store.put_user(UserRecord::new("u1", Utc::now())).await.unwrap();
        store
            .register_integration_identity(ActivitySource::Strava, "99", "u1")
            .await
            .unwrap();
        store
            .set_uploaded_activity(UploadedActivityRecord {
                destination: Destination::Strava,
                destination_id: "1234567".to_string(),
                user_id: "u1".to_string(),
                source: ActivitySource::Mobile,
                source_external_id: "m1".to_string(),
                start_time: Utc::now(),
                uploaded_at: Utc::now(),
            })
            .await
            .unwrap();

        let provider = StravaProvider::new("secret");
        let (body, sig) = signed_create(1234567, 99);
        let outcome = service
            .handle_webhook(&provider, Some(&sig), &body)
            .await
            .unwrap();
        assert_eq!(outcome, IngressOutcome::Bounceback);
    }

    #[tokio::test]
    async fn mobile_sync_skips_duplicates_in_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, service) = service_with(&dir, Vec::new()).await;

        let activity = StandardizedActivity {
            source: ActivitySource::Mobile,
            external_id: "m1".to_string(),
            user_id: String::new(),
            activity_type: ActivityType::Run,
            name: "Run".to_string(),
            description: String::new(),
            start_time: Utc::now(),
            sessions: Vec::new(),
        };
        let response = service
            .handle_mobile_sync(
                "u1",
                MobileSyncRequest {
                    activities: vec![activity.clone(), activity],
                    device: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(response.processed_count, 1);
        assert_eq!(response.skipped_count, 1);
        assert_eq!(response.execution_ids.len(), 1);
    }
}
