use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn, Level};

use stride_bus::{
    CloudEvent, Delivery, HandlerOutcome, MessageBus, MessageHandler, Offloader,
    TOPIC_RAW_ACTIVITY,
};
use stride_enrichers::ParkrunClient;
use stride_observability::{emit_event, PipelineEvent, Stage};
use stride_store::{ExecutionLog, ExecutionRecord, MetadataStore, TriggerType};
use stride_types::{ActivityPayload, EnricherKind, PendingInput, PendingInputStatus};

/// Completes pending inputs and republishes their runs. Used by the HTTP
/// resolution endpoints, the deadline sweeper, and the auto-populators.
pub struct PendingInputService {
    store: Arc<dyn MetadataStore>,
    bus: Arc<dyn MessageBus>,
    offloader: Offloader,
    execution_log: Arc<ExecutionLog>,
}

impl PendingInputService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        bus: Arc<dyn MessageBus>,
        offloader: Offloader,
        execution_log: Arc<ExecutionLog>,
    ) -> Self {
        Self {
            store,
            bus,
            offloader,
            execution_log,
        }
    }

    /// User-supplied resolution. All required fields must be present after
    /// the merge.
    pub async fn resolve(
        &self,
        activity_id: &str,
        input_data: HashMap<String, String>,
    ) -> anyhow::Result<PendingInput> {
        self.complete(activity_id, input_data, false, false).await
    }

    /// Dismissal: the run continues without the data.
    pub async fn dismiss(&self, activity_id: &str) -> anyhow::Result<PendingInput> {
        self.complete(activity_id, HashMap::new(), false, true).await
    }

    /// Auto-populated resolution from an upstream poller.
    pub async fn auto_populate(
        &self,
        activity_id: &str,
        input_data: HashMap<String, String>,
    ) -> anyhow::Result<PendingInput> {
        self.complete(activity_id, input_data, true, false).await
    }

    async fn complete(
        &self,
        activity_id: &str,
        input_data: HashMap<String, String>,
        auto_populated: bool,
        continued_without_resolution: bool,
    ) -> anyhow::Result<PendingInput> {
        let mut input = self
            .store
            .get_pending_input(activity_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no pending input for {activity_id}"))?;
        if !input.is_waiting() {
            anyhow::bail!("pending input {activity_id} is already completed");
        }

        input.input_data.extend(input_data);
        if !continued_without_resolution && !input.is_satisfied() {
            let missing: Vec<&str> = input
                .required_fields
                .iter()
                .filter(|f| !input.input_data.contains_key(*f))
                .map(String::as_str)
                .collect();
            anyhow::bail!("missing required fields: {}", missing.join(", "));
        }

        input.status = PendingInputStatus::Completed;
        input.auto_populated = auto_populated;
        input.continued_without_resolution = continued_without_resolution;
        input.completed_at = Some(Utc::now());
        input.updated_at = Utc::now();
        self.store.update_pending_input(input.clone()).await?;

        self.publish_resume(&input).await?;
        Ok(input)
    }

    /// Completes every WAITING input whose deadline has passed with a
    /// continue-without-resolution, so parked runs never wait forever.
    pub async fn sweep_deadlines(&self) -> anyhow::Result<usize> {
        let now = Utc::now();
        let overdue: Vec<PendingInput> = self
            .store
            .list_pending_inputs(PendingInputStatus::Waiting)
            .await?
            .into_iter()
            .filter(|i| i.auto_deadline < now)
            .collect();

        let mut swept = 0;
        for input in overdue {
            let record = ExecutionRecord::start("pending_input.sweeper", TriggerType::Sweeper)
                .with_user(&input.user_id);
            match self.dismiss(&input.activity_id).await {
                Ok(_) => {
                    swept += 1;
                    let _ = self
                        .execution_log
                        .append(&record.succeed(Some(format!(
                            "deadline passed for {}",
                            input.activity_id
                        ))))
                        .await;
                }
                Err(e) => {
                    warn!("deadline sweep of {} failed: {e:#}", input.activity_id);
                    let _ = self.execution_log.append(&record.fail(e.to_string())).await;
                }
            }
        }
        Ok(swept)
    }

    /// Retry affordance for PARTIAL/FAILED runs: republish the original
    /// payload with the same execution id.
    pub async fn retry_run(&self, run_id: &str) -> anyhow::Result<()> {
        let run = self
            .store
            .get_pipeline_run(run_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no run {run_id}"))?;
        let uri = run
            .original_payload_uri
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("run {run_id} has no original payload"))?;
        let mut payload: ActivityPayload = self.offloader.read_json(uri).await?;
        payload.is_resume = true;
        payload.pipeline_execution_id = Some(run.run_id.clone());
        self.publish_raw(payload).await
    }

    async fn publish_resume(&self, input: &PendingInput) -> anyhow::Result<()> {
        let uri = input
            .original_payload_uri
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("pending input {} has no payload uri", input.activity_id))?;
        let mut payload: ActivityPayload = self.offloader.read_json(uri).await?;
        payload.is_resume = true;
        payload.pipeline_execution_id = input.linked_execution_id.clone();
        info!(
            "resuming run {:?} from pending input {}",
            payload.pipeline_execution_id, input.activity_id
        );
        self.publish_raw(payload).await
    }

    async fn publish_raw(&self, payload: ActivityPayload) -> anyhow::Result<()> {
        let user_id = payload.user_id.clone();
        let run_id = payload.pipeline_execution_id.clone();
        let source = payload.source;
        let payload = self.offloader.offload_raw(payload).await?;
        let event = CloudEvent::new("stride.resume", "activity.raw", &payload)?;
        self.bus.publish(TOPIC_RAW_ACTIVITY, event).await?;
        emit_event(
            Level::INFO,
            PipelineEvent {
                user_id: Some(&user_id),
                run_id: run_id.as_deref(),
                source: Some(source.as_str()),
                status: Some("republished"),
                ..PipelineEvent::new(Stage::Resume, "run.resume_published")
            },
        );
        Ok(())
    }
}

/// Consumer of the parkrun trigger topic: polls published results for every
/// waiting parkrun input and auto-populates the ones that have landed.
pub struct ParkrunAutoPopulator {
    store: Arc<dyn MetadataStore>,
    service: Arc<PendingInputService>,
    client: Arc<dyn ParkrunClient>,
}

impl ParkrunAutoPopulator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        service: Arc<PendingInputService>,
        client: Arc<dyn ParkrunClient>,
    ) -> Self {
        Self {
            store,
            service,
            client,
        }
    }

    async fn poll_once(&self) -> anyhow::Result<usize> {
        let waiting = self
            .store
            .list_pending_inputs_by_enricher(
                EnricherKind::ParkrunResults,
                PendingInputStatus::Waiting,
            )
            .await?;

        let mut populated = 0;
        for input in waiting {
            let Some(athlete_id) = input.provider_metadata.get("athlete_id") else {
                continue;
            };
            let Some(date) = input
                .provider_metadata
                .get("event_date")
                .and_then(|d| d.parse().ok())
            else {
                continue;
            };

            match self.client.result_for(athlete_id, date).await {
                Ok(Some(result)) => {
                    let mut data = HashMap::new();
                    data.insert(
                        "finish_position".to_string(),
                        result.finish_position.to_string(),
                    );
                    data.insert("finish_time".to_string(), result.finish_time.clone());
                    if let Some(event_name) = &result.event_name {
                        data.insert("event_name".to_string(), event_name.clone());
                    }
                    match self.service.auto_populate(&input.activity_id, data).await {
                        Ok(_) => populated += 1,
                        Err(e) => warn!(
                            "auto-populate of {} failed: {e:#}",
                            input.activity_id
                        ),
                    }
                }
                Ok(None) => {} // results not published yet; next trigger retries
                Err(e) => warn!("parkrun poll for {} failed: {e:#}", input.activity_id),
            }
        }
        Ok(populated)
    }
}

#[async_trait]
impl MessageHandler for ParkrunAutoPopulator {
    async fn handle(&self, _delivery: Delivery) -> HandlerOutcome {
        // Best effort: a failed poll is retried by the next trigger tick
        // rather than by redelivery.
        match self.poll_once().await {
            Ok(n) if n > 0 => info!("auto-populated {n} parkrun inputs"),
            Ok(_) => {}
            Err(e) => warn!("parkrun auto-populator failed: {e:#}"),
        }
        HandlerOutcome::Ack
    }
}
