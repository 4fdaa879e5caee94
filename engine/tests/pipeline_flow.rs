//! End-to-end pipeline flows over the in-process bus: ingress → orchestrator
//! → enricher chain → destination fan-out → status reduction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use stride_bus::{
    BusConfig, CloudEvent, Delivery, HandlerOutcome, InProcessBus, MessageBus, MessageHandler,
    Offloader, TOPIC_ENRICHED_ACTIVITY,
};
use stride_destinations::{
    DestinationSubscriber, HevyUploader, StravaApi, StravaCreateRequest, StravaUploadStatus,
    StravaUploader, SyncPolicy, UploadError,
};
use stride_enrichers::{
    BrandingEnricher, EnricherRegistry, ParkrunResultsEnricher, StreakTrackerEnricher,
};
use stride_ingress::{
    hmac_sha256_hex, IngressOutcome, IngressService, ProviderSdk, StravaProvider, TokenSource,
};
use stride_orchestrator::{ChainRunner, Orchestrator, PendingInputService};
use stride_store::{BlobStore, ExecutionLog, JsonStore, MemoryBlobStore, MetadataStore};
use stride_types::{
    ActivitySource, ActivityType, BoosterStatus, Destination, EnricherConfig, EnricherKind,
    Integration, OutcomeStatus, PipelineConfig, RunStatus, Session, StandardizedActivity,
    UserRecord,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct StaticTokens;

#[async_trait]
impl TokenSource for StaticTokens {
    async fn bearer_token(&self, _user_id: &str, _provider: &str) -> anyhow::Result<String> {
        Ok("test-token".to_string())
    }
}

#[derive(Default)]
struct FakeStravaApi {
    next_id: AtomicU64,
    remote_descriptions: Mutex<HashMap<u64, String>>,
    updates: Mutex<Vec<(u64, String, String)>>,
    creates: Mutex<Vec<StravaCreateRequest>>,
}

#[async_trait]
impl StravaApi for FakeStravaApi {
    async fn create_activity(
        &self,
        _token: &str,
        request: &StravaCreateRequest,
    ) -> Result<u64, UploadError> {
        let id = 7_000_000 + self.next_id.fetch_add(1, Ordering::SeqCst);
        self.remote_descriptions
            .lock()
            .unwrap()
            .insert(id, request.description.clone());
        self.creates.lock().unwrap().push(request.clone());
        Ok(id)
    }

    async fn start_upload(&self, _token: &str, _fit_data: Vec<u8>) -> Result<u64, UploadError> {
        Ok(1)
    }

    async fn check_upload(
        &self,
        _token: &str,
        _upload_id: u64,
    ) -> Result<StravaUploadStatus, UploadError> {
        Ok(StravaUploadStatus {
            activity_id: Some(7_999_999),
            error: None,
        })
    }

    async fn get_description(&self, _token: &str, activity_id: u64) -> Result<String, UploadError> {
        Ok(self
            .remote_descriptions
            .lock()
            .unwrap()
            .get(&activity_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_activity(
        &self,
        _token: &str,
        activity_id: u64,
        name: &str,
        description: &str,
    ) -> Result<(), UploadError> {
        self.remote_descriptions
            .lock()
            .unwrap()
            .insert(activity_id, description.to_string());
        self.updates
            .lock()
            .unwrap()
            .push((activity_id, name.to_string(), description.to_string()));
        Ok(())
    }
}

struct FakeHevyApi;

#[async_trait]
impl stride_destinations::HevyApi for FakeHevyApi {
    async fn create_workout(
        &self,
        _api_key: &str,
        _workout: &stride_destinations::HevyWorkout,
    ) -> Result<String, UploadError> {
        Ok("hevy-w1".to_string())
    }
}

struct FakeSdk {
    by_id: Mutex<HashMap<String, serde_json::Value>>,
}

#[async_trait]
impl ProviderSdk for FakeSdk {
    async fn fetch_activity(
        &self,
        _user_id: &str,
        _source: ActivitySource,
        external_id: &str,
    ) -> anyhow::Result<serde_json::Value> {
        self.by_id
            .lock()
            .unwrap()
            .get(external_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no activity {external_id}"))
    }

    async fn fetch_activities_for_day(
        &self,
        _user_id: &str,
        _source: ActivitySource,
        _date: chrono::NaiveDate,
    ) -> anyhow::Result<Vec<serde_json::Value>> {
        Ok(Vec::new())
    }
}

/// Extra subscription on the enriched topic so tests can inspect the
/// envelopes as published.
#[derive(Default)]
struct EnrichedTap {
    events: Mutex<Vec<CloudEvent>>,
}

#[async_trait]
impl MessageHandler for EnrichedTap {
    async fn handle(&self, delivery: Delivery) -> HandlerOutcome {
        self.events.lock().unwrap().push(delivery.event);
        HandlerOutcome::Ack
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<JsonStore>,
    blob: Arc<MemoryBlobStore>,
    ingress: Arc<IngressService>,
    pending: Arc<PendingInputService>,
    strava_api: Arc<FakeStravaApi>,
    tap: Arc<EnrichedTap>,
}

async fn harness_with_threshold(offload_threshold: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonStore::new(dir.path().join("storage")).await.unwrap());
    let blob = Arc::new(MemoryBlobStore::new());
    let offloader = Offloader::new(blob.clone(), "stride", offload_threshold);
    let execution_log = Arc::new(ExecutionLog::new(dir.path().join("executions.jsonl")));
    let bus = Arc::new(InProcessBus::new(BusConfig {
        max_deliveries: 5,
        ack_deadline: Duration::from_secs(5),
        redelivery_backoff: Duration::from_millis(5),
        queue_capacity: 64,
    }));

    let mut registry = EnricherRegistry::new();
    registry.register(Arc::new(StreakTrackerEnricher));
    registry.register(Arc::new(BrandingEnricher));
    registry.register(Arc::new(ParkrunResultsEnricher));

    let sdk = Arc::new(FakeSdk {
        by_id: Mutex::new(HashMap::new()),
    });
    let ingress = Arc::new(IngressService::new(
        store.clone(),
        bus.clone(),
        offloader.clone(),
        sdk,
        execution_log.clone(),
    ));

    let runner = ChainRunner::new(registry, store.clone());
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        bus.clone(),
        offloader.clone(),
        runner,
        execution_log.clone(),
    ));
    bus.subscribe(stride_bus::TOPIC_RAW_ACTIVITY, "orchestrator", orchestrator)
        .await
        .unwrap();

    let strava_api = Arc::new(FakeStravaApi::default());
    let strava = Arc::new(DestinationSubscriber::new(
        Arc::new(StravaUploader::new(strava_api.clone(), Arc::new(StaticTokens))),
        store.clone(),
        offloader.clone(),
        execution_log.clone(),
        SyncPolicy::default(),
    ));
    bus.subscribe(TOPIC_ENRICHED_ACTIVITY, &strava.subscription_name(), strava)
        .await
        .unwrap();
    let hevy = Arc::new(DestinationSubscriber::new(
        Arc::new(HevyUploader::new(Arc::new(FakeHevyApi))),
        store.clone(),
        offloader.clone(),
        execution_log.clone(),
        SyncPolicy::default(),
    ));
    bus.subscribe(TOPIC_ENRICHED_ACTIVITY, &hevy.subscription_name(), hevy)
        .await
        .unwrap();

    let tap = Arc::new(EnrichedTap::default());
    bus.subscribe(TOPIC_ENRICHED_ACTIVITY, "test-tap", tap.clone())
        .await
        .unwrap();

    let pending = Arc::new(PendingInputService::new(
        store.clone(),
        bus.clone(),
        offloader.clone(),
        execution_log,
    ));

    Harness {
        _dir: dir,
        store,
        blob,
        ingress,
        pending,
        strava_api,
        tap,
    }
}

async fn harness() -> Harness {
    harness_with_threshold(stride_bus::DEFAULT_OFFLOAD_THRESHOLD).await
}

async fn seed_user(store: &JsonStore, with_hevy_key: bool) {
    let mut user = UserRecord::new("u1", Utc::now());
    if with_hevy_key {
        user.integrations.insert(
            "hevy".to_string(),
            Integration {
                access_token: None,
                refresh_token: None,
                token_expires_at: None,
                api_key: Some("hevy-key".to_string()),
                provider_user_id: None,
                public_id: None,
                enabled: true,
                created_at: Utc::now(),
                last_used_at: None,
            },
        );
    }
    store.put_user(user).await.unwrap();
    store
        .register_integration_identity(ActivitySource::Strava, "99", "u1")
        .await
        .unwrap();
}

fn strava_pipeline(enrichers: Vec<EnricherKind>, destinations: Vec<Destination>) -> PipelineConfig {
    let mut pipeline = PipelineConfig::new("Strava runs", ActivitySource::Strava);
    pipeline.enrichers = enrichers.into_iter().map(EnricherConfig::new).collect();
    pipeline.destinations = destinations;
    pipeline
}

fn run_activity(external_id: &str, day: u32) -> StandardizedActivity {
    StandardizedActivity {
        source: ActivitySource::Strava,
        external_id: external_id.to_string(),
        user_id: "u1".to_string(),
        activity_type: ActivityType::Run,
        name: "Morning Run".to_string(),
        description: String::new(),
        start_time: Utc.with_ymd_and_hms(2026, 2, day, 7, 30, 0).unwrap(),
        sessions: vec![Session {
            total_elapsed_s: 1800.0,
            total_distance_m: 5000.0,
            total_calories: None,
            avg_heart_rate: Some(150),
            max_heart_rate: None,
            laps: Vec::new(),
            strength_sets: Vec::new(),
        }],
    }
}

async fn publish_raw(h: &Harness, activity: StandardizedActivity) {
    h.ingress
        .publish_payload(stride_types::ActivityPayload::new("u1", activity))
        .await
        .unwrap();
}

async fn wait_for_run_status(
    store: &JsonStore,
    activity_id: &str,
    pipeline_id: &str,
    status: RunStatus,
) -> stride_types::PipelineRun {
    for _ in 0..200 {
        if let Some(run) = store
            .find_pipeline_run("u1", activity_id, pipeline_id)
            .await
            .unwrap()
        {
            if run.status == status {
                return run;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("run for {activity_id} never reached {status:?}");
}

// ---------------------------------------------------------------------------
// Seed scenarios
// ---------------------------------------------------------------------------

/// First activity through a two-enricher, one-destination pipeline.
#[tokio::test]
async fn first_activity_flows_to_synced() {
    let h = harness().await;
    seed_user(&h.store, false).await;
    let pipeline = strava_pipeline(
        vec![EnricherKind::StreakTracker, EnricherKind::Branding],
        vec![Destination::Strava],
    );
    let pipeline_id = pipeline.pipeline_id.clone();
    h.store.put_pipeline("u1", pipeline).await.unwrap();

    publish_raw(&h, run_activity("42", 8)).await;
    let run = wait_for_run_status(&h.store, "strava:42", &pipeline_id, RunStatus::Synced).await;

    // Booster set equals the pipeline's enricher chain, in order.
    let booster_names: Vec<&str> = run.boosters.iter().map(|b| b.provider_name.as_str()).collect();
    assert_eq!(booster_names, vec!["streak_tracker", "branding"]);
    assert!(run.boosters.iter().all(|b| b.status == BoosterStatus::Success));
    assert_eq!(
        run.boosters[0].metadata.get("streak_current").unwrap(),
        "1"
    );

    let outcome = run.outcome(Destination::Strava).unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Success);
    let external_id = outcome.external_id.clone().unwrap();

    // Loop-prevention record exists for the uploaded id.
    let uploaded = h
        .store
        .find_uploaded_activity("u1", Destination::Strava, &external_id)
        .await
        .unwrap();
    assert!(uploaded.is_some());

    // Monthly sync counter moved.
    let user = h.store.get_user("u1").await.unwrap().unwrap();
    assert_eq!(user.monthly_sync_count, 1);
}

/// Pre-seeded streak state continues rather than restarting.
#[tokio::test]
async fn streak_continues_across_days() {
    let h = harness().await;
    seed_user(&h.store, false).await;
    h.store
        .set_booster_data(
            "u1",
            "streak_tracker",
            serde_json::json!({"current_streak": 5, "last_activity_date": "2026-02-07"}),
        )
        .await
        .unwrap();
    let pipeline = strava_pipeline(vec![EnricherKind::StreakTracker], vec![]);
    let pipeline_id = pipeline.pipeline_id.clone();
    h.store.put_pipeline("u1", pipeline).await.unwrap();

    publish_raw(&h, run_activity("43", 8)).await;
    let run = wait_for_run_status(&h.store, "strava:43", &pipeline_id, RunStatus::Synced).await;

    assert_eq!(run.boosters[0].metadata.get("streak_current").unwrap(), "6");
    let state = h
        .store
        .get_booster_data("u1", "streak_tracker")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state["current_streak"], 6);
    assert_eq!(state["last_activity_date"], "2026-02-08");
}

/// A webhook for an activity we ourselves uploaded is suppressed.
#[tokio::test]
async fn bounceback_webhook_creates_no_run() {
    let h = harness().await;
    seed_user(&h.store, false).await;
    let pipeline = strava_pipeline(
        vec![EnricherKind::Branding],
        vec![Destination::Strava],
    );
    let pipeline_id = pipeline.pipeline_id.clone();
    h.store.put_pipeline("u1", pipeline).await.unwrap();

    publish_raw(&h, run_activity("1234567", 8)).await;
    let run =
        wait_for_run_status(&h.store, "strava:1234567", &pipeline_id, RunStatus::Synced).await;
    let uploaded_id = run
        .outcome(Destination::Strava)
        .unwrap()
        .external_id
        .clone()
        .unwrap();

    // The third-party service now announces "our" activity back to us.
    let provider = StravaProvider::new("secret");
    let body = serde_json::to_vec(&serde_json::json!({
        "object_type": "activity",
        "aspect_type": "create",
        "object_id": uploaded_id.parse::<u64>().unwrap(),
        "owner_id": 99,
    }))
    .unwrap();
    let signature = hmac_sha256_hex(b"secret", &body);
    let outcome = h
        .ingress
        .handle_webhook(&provider, Some(&signature), &body)
        .await
        .unwrap();
    assert_eq!(outcome, IngressOutcome::Bounceback);

    // Still exactly one run for this activity.
    let activity_id = format!("strava:{uploaded_id}");
    assert!(h
        .store
        .find_pipeline_run("u1", &activity_id, &pipeline_id)
        .await
        .unwrap()
        .is_none());
}

/// Deferred parkrun input parks the run; resolution resumes it to SYNCED.
#[tokio::test]
async fn deferred_input_then_resume_reaches_synced() {
    let h = harness().await;
    seed_user(&h.store, false).await;
    let pipeline = strava_pipeline(
        vec![EnricherKind::ParkrunResults, EnricherKind::Branding],
        vec![Destination::Strava],
    );
    let pipeline_id = pipeline.pipeline_id.clone();
    h.store.put_pipeline("u1", pipeline).await.unwrap();

    publish_raw(&h, run_activity("555", 7)).await;

    // The chain parks: run RUNNING, pending input waiting, no booster for
    // the parkrun enricher or anything after it.
    let run = {
        let mut parked = None;
        for _ in 0..200 {
            if let Some(run) = h
                .store
                .find_pipeline_run("u1", "strava:555", &pipeline_id)
                .await
                .unwrap()
            {
                if run.pending_input_id.is_some() {
                    parked = Some(run);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        parked.expect("run never parked on pending input")
    };
    assert_eq!(run.status, RunStatus::Running);
    assert!(run.boosters.is_empty());

    let input = h.store.get_pending_input("strava:555").await.unwrap().unwrap();
    assert!(input.is_waiting());
    assert_eq!(input.required_fields, vec!["finish_position", "finish_time"]);

    // Resolve and watch the run complete.
    let mut data = HashMap::new();
    data.insert("finish_position".to_string(), "12".to_string());
    data.insert("finish_time".to_string(), "21:43".to_string());
    h.pending.resolve("strava:555", data).await.unwrap();

    let run = wait_for_run_status(&h.store, "strava:555", &pipeline_id, RunStatus::Synced).await;
    let booster_names: Vec<&str> = run.boosters.iter().map(|b| b.provider_name.as_str()).collect();
    assert_eq!(booster_names, vec!["parkrun_results", "branding"]);
    assert_eq!(
        run.outcome(Destination::Strava).unwrap().status,
        OutcomeStatus::Success
    );

    // The parkrun section made it into the destination-side description.
    let updates = h.strava_api.updates.lock().unwrap();
    let (_, _, description) = updates.last().expect("no strava update recorded");
    assert!(description.contains("🏁 Parkrun:"));
    assert!(description.contains("P12 in 21:43"));
}

/// One destination succeeds, the other fails permanently: PARTIAL.
#[tokio::test]
async fn partial_destination_failure() {
    let h = harness().await;
    // No hevy API key configured, so the hevy upload fails permanently.
    seed_user(&h.store, false).await;
    let pipeline = strava_pipeline(
        vec![EnricherKind::Branding],
        vec![Destination::Strava, Destination::Hevy],
    );
    let pipeline_id = pipeline.pipeline_id.clone();
    h.store.put_pipeline("u1", pipeline).await.unwrap();

    publish_raw(&h, run_activity("70", 8)).await;
    let run = wait_for_run_status(&h.store, "strava:70", &pipeline_id, RunStatus::Partial).await;

    assert_eq!(
        run.outcome(Destination::Strava).unwrap().status,
        OutcomeStatus::Success
    );
    assert_eq!(
        run.outcome(Destination::Hevy).unwrap().status,
        OutcomeStatus::Failed
    );

    // Only the successful destination has a loop-prevention record.
    let strava_id = run
        .outcome(Destination::Strava)
        .unwrap()
        .external_id
        .clone()
        .unwrap();
    assert!(h
        .store
        .find_uploaded_activity("u1", Destination::Strava, &strava_id)
        .await
        .unwrap()
        .is_some());
}

/// Oversized payloads cross the bus as blob references and reconstruct
/// identically on the consuming side.
#[tokio::test]
async fn oversized_event_is_offloaded_and_reconstructed() {
    let h = harness_with_threshold(64 * 1024).await;
    seed_user(&h.store, false).await;
    let pipeline = strava_pipeline(vec![EnricherKind::Branding], vec![Destination::Strava]);
    let pipeline_id = pipeline.pipeline_id.clone();
    h.store.put_pipeline("u1", pipeline).await.unwrap();

    let mut activity = run_activity("90", 8);
    activity.description = "x".repeat(200 * 1024);
    publish_raw(&h, activity).await;

    let run = wait_for_run_status(&h.store, "strava:90", &pipeline_id, RunStatus::Synced).await;

    // The full event body landed in blob storage under the run's key.
    assert!(h
        .blob
        .exists("stride", &format!("enriched_events/u1/{}.json", run.run_id))
        .await
        .unwrap());

    // The published envelope was small and carried only the reference.
    let events = h.tap.events.lock().unwrap();
    let envelope = events.last().expect("no enriched event captured");
    assert!(envelope.encoded_len() < 64 * 1024);
    let event: stride_types::EnrichedActivityEvent = envelope.decode().unwrap();
    assert!(event.activity.is_none());
    assert!(event.activity_data_uri.is_some());
    drop(events);

    // The destination uploader hydrated the full description.
    let updates = h.strava_api.updates.lock().unwrap();
    let (_, _, description) = updates.last().expect("no strava update recorded");
    assert!(description.contains(&"x".repeat(1024)));
}

/// Redelivering the same raw payload does not double-apply side effects.
#[tokio::test]
async fn redelivered_payload_is_idempotent() {
    let h = harness().await;
    seed_user(&h.store, false).await;
    let pipeline = strava_pipeline(
        vec![EnricherKind::StreakTracker, EnricherKind::Branding],
        vec![Destination::Strava],
    );
    let pipeline_id = pipeline.pipeline_id.clone();
    h.store.put_pipeline("u1", pipeline).await.unwrap();

    publish_raw(&h, run_activity("100", 8)).await;
    wait_for_run_status(&h.store, "strava:100", &pipeline_id, RunStatus::Synced).await;

    publish_raw(&h, run_activity("100", 8)).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let run = wait_for_run_status(&h.store, "strava:100", &pipeline_id, RunStatus::Synced).await;
    assert_eq!(run.boosters.len(), 2);
    let state = h
        .store
        .get_booster_data("u1", "streak_tracker")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state["current_streak"], 1);
    let user = h.store.get_user("u1").await.unwrap().unwrap();
    assert_eq!(user.monthly_sync_count, 1);
}
