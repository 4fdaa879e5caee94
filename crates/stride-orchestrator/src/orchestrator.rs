use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn, Level};
use uuid::Uuid;

use stride_bus::{
    CloudEvent, Delivery, HandlerOutcome, MessageBus, MessageHandler, Offloader,
    TOPIC_ENRICHED_ACTIVITY,
};
use stride_observability::{emit_event, PipelineEvent, Stage};
use stride_store::{
    enriched_event_key, original_payload_key, ExecutionLog, ExecutionRecord, MetadataStore,
    TriggerType,
};
use stride_types::{
    ActivityPayload, DestinationOutcome, EnrichedActivityEvent, PendingInputStatus, PipelineConfig,
    PipelineRun, RunStatus, StandardizedActivity, UserRecord,
};

use crate::runner::{ChainOutput, ChainRunner, ChainVerdict};
use crate::reduce_status;

/// Single consumer of the raw-activity topic. Resolves each payload against
/// the user's pipelines and drives one enricher chain per matching pipeline.
pub struct Orchestrator {
    store: Arc<dyn MetadataStore>,
    bus: Arc<dyn MessageBus>,
    offloader: Offloader,
    runner: ChainRunner,
    execution_log: Arc<ExecutionLog>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        bus: Arc<dyn MessageBus>,
        offloader: Offloader,
        runner: ChainRunner,
        execution_log: Arc<ExecutionLog>,
    ) -> Self {
        Self {
            store,
            bus,
            offloader,
            runner,
            execution_log,
        }
    }

    async fn process(&self, delivery: &Delivery) -> anyhow::Result<bool> {
        let payload: ActivityPayload = delivery.event.decode()?;
        let payload = self.offloader.hydrate_raw(payload).await?;
        let activity = payload
            .activity
            .clone()
            .ok_or_else(|| anyhow::anyhow!("raw payload without activity after hydration"))?;

        let Some(user) = self.store.get_user(&payload.user_id).await? else {
            info!("dropping activity for unknown user {}", payload.user_id);
            return Ok(false);
        };
        if !user.access_enabled {
            info!("dropping activity for disabled user {}", user.user_id);
            return Ok(false);
        }

        let pipelines: Vec<PipelineConfig> = self
            .store
            .list_pipelines(&user.user_id)
            .await?
            .into_iter()
            .filter(|p| p.accepts(activity.source))
            .collect();
        if pipelines.is_empty() {
            info!(
                "no enabled pipelines for {} activities of user {}",
                activity.source, user.user_id
            );
            return Ok(false);
        }

        // Pipelines of one user are independent; a retry request from any
        // of them nacks the shared delivery, and per-pipeline idempotency
        // keeps the already-finished ones from repeating side effects.
        let do_not_retry = delivery.attempt > 1;
        let mut needs_retry = false;
        for pipeline in &pipelines {
            if self
                .process_pipeline(&user, pipeline, &payload, &activity, do_not_retry)
                .await?
            {
                needs_retry = true;
            }
        }
        Ok(needs_retry)
    }

    async fn process_pipeline(
        &self,
        user: &UserRecord,
        pipeline: &PipelineConfig,
        payload: &ActivityPayload,
        activity: &StandardizedActivity,
        do_not_retry: bool,
    ) -> anyhow::Result<bool> {
        let activity_id = activity.identity_key();
        let record = ExecutionRecord::start(
            "orchestrator",
            if payload.is_resume {
                TriggerType::Resume
            } else {
                TriggerType::BusMessage
            },
        )
        .with_user(&user.user_id)
        .with_input(format!("{activity_id} via {}", pipeline.pipeline_id));

        let run = match self
            .store
            .find_pipeline_run(&user.user_id, &activity_id, &pipeline.pipeline_id)
            .await?
        {
            Some(existing) if existing.status.is_terminal() => {
                info!(
                    "run {} already terminal ({:?}); skipping",
                    existing.run_id, existing.status
                );
                return Ok(false);
            }
            Some(existing) if !payload.is_resume && existing.pending_input_id.is_some() => {
                info!("run {} parked on pending input; skipping", existing.run_id);
                return Ok(false);
            }
            Some(existing) if !payload.is_resume && existing.enriched_event_uri.is_some() => {
                info!(
                    "run {} already published; destinations in flight",
                    existing.run_id
                );
                return Ok(false);
            }
            Some(existing) => existing,
            None => {
                let run = self.create_run(user, pipeline, payload, activity).await?;
                info!(
                    "created run {} for {activity_id} on pipeline {}",
                    run.run_id, pipeline.pipeline_id
                );
                emit_event(
                    Level::INFO,
                    PipelineEvent {
                        user_id: Some(&user.user_id),
                        pipeline_id: Some(&pipeline.pipeline_id),
                        run_id: Some(&run.run_id),
                        activity_id: Some(&activity_id),
                        source: Some(activity.source.as_str()),
                        ..PipelineEvent::new(Stage::Orchestrator, "run.created")
                    },
                );
                run
            }
        };
        let record = record.with_execution(&run.run_id);

        let resolved_input = if payload.is_resume {
            self.store
                .get_pending_input(&activity_id)
                .await?
                .filter(|i| i.status == PendingInputStatus::Completed)
                .filter(|i| i.linked_execution_id.as_deref() == Some(run.run_id.as_str()))
        } else {
            None
        };

        let verdict = self
            .runner
            .run(
                &run,
                pipeline,
                user,
                activity.clone(),
                resolved_input.as_ref(),
                do_not_retry,
            )
            .await?;

        match verdict {
            ChainVerdict::Completed(output) => {
                self.publish_enriched(&run, pipeline, output).await?;
                emit_event(
                    Level::INFO,
                    PipelineEvent {
                        user_id: Some(&user.user_id),
                        pipeline_id: Some(&pipeline.pipeline_id),
                        run_id: Some(&run.run_id),
                        activity_id: Some(&activity_id),
                        status: Some("published"),
                        ..PipelineEvent::new(Stage::Orchestrator, "run.enriched")
                    },
                );
                let _ = self
                    .execution_log
                    .append(&record.succeed(Some("published enriched event".to_string())))
                    .await;
                Ok(false)
            }
            ChainVerdict::Paused { pending_input_id } => {
                emit_event(
                    Level::INFO,
                    PipelineEvent {
                        user_id: Some(&user.user_id),
                        pipeline_id: Some(&pipeline.pipeline_id),
                        run_id: Some(&run.run_id),
                        activity_id: Some(&activity_id),
                        status: Some("waiting"),
                        detail: Some(&pending_input_id),
                        ..PipelineEvent::new(Stage::Enricher, "run.paused")
                    },
                );
                let _ = self
                    .execution_log
                    .append(&record.succeed(Some(format!("paused on {pending_input_id}"))))
                    .await;
                Ok(false)
            }
            ChainVerdict::RetryRequested { enricher, message } => {
                warn!("enricher {enricher} requested retry: {message}");
                emit_event(
                    Level::WARN,
                    PipelineEvent {
                        user_id: Some(&user.user_id),
                        run_id: Some(&run.run_id),
                        enricher: Some(&enricher),
                        status: Some("retrying"),
                        detail: Some(&message),
                        ..PipelineEvent::new(Stage::Enricher, "run.retry_requested")
                    },
                );
                let _ = self
                    .execution_log
                    .append(&record.fail(format!("{enricher}: {message} (retrying)")))
                    .await;
                Ok(true)
            }
            ChainVerdict::Aborted { enricher, message } => {
                let status_message = format!("critical enricher {enricher} failed: {message}");
                self.store
                    .set_run_status(&run.run_id, RunStatus::Failed, Some(status_message.clone()))
                    .await?;
                emit_event(
                    Level::ERROR,
                    PipelineEvent {
                        user_id: Some(&user.user_id),
                        run_id: Some(&run.run_id),
                        enricher: Some(&enricher),
                        status: Some("failed"),
                        detail: Some(&message),
                        ..PipelineEvent::new(Stage::Enricher, "run.aborted")
                    },
                );
                let _ = self.execution_log.append(&record.fail(status_message)).await;
                Ok(false)
            }
        }
    }

    async fn create_run(
        &self,
        user: &UserRecord,
        pipeline: &PipelineConfig,
        payload: &ActivityPayload,
        activity: &StandardizedActivity,
    ) -> anyhow::Result<PipelineRun> {
        let activity_id = activity.identity_key();
        let run_id = payload
            .pipeline_execution_id
            .clone()
            .filter(|_| payload.is_resume)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let original_payload_uri = self
            .offloader
            .write_json(
                &original_payload_key(&user.user_id, &activity_id),
                payload,
            )
            .await?;

        let run = PipelineRun {
            run_id,
            pipeline_id: pipeline.pipeline_id.clone(),
            user_id: user.user_id.clone(),
            activity_id,
            source: activity.source,
            title: activity.name.clone(),
            description: activity.description.clone(),
            activity_type: activity.activity_type,
            status: RunStatus::Running,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            status_message: None,
            pending_input_id: None,
            original_payload_uri: Some(original_payload_uri),
            enriched_event_uri: None,
            boosters: Vec::new(),
            destinations: pipeline
                .destinations
                .iter()
                .map(|d| DestinationOutcome::pending(*d))
                .collect(),
        };
        self.store.create_pipeline_run(run.clone()).await?;
        Ok(run)
    }

    async fn publish_enriched(
        &self,
        run: &PipelineRun,
        pipeline: &PipelineConfig,
        output: ChainOutput,
    ) -> anyhow::Result<()> {
        let event = EnrichedActivityEvent {
            pipeline_id: pipeline.pipeline_id.clone(),
            pipeline_execution_id: run.run_id.clone(),
            user_id: run.user_id.clone(),
            activity: Some(output.activity.clone()),
            activity_data_uri: None,
            applied_enrichments: output.applied,
            metadata: output.metadata,
            destinations: pipeline.destinations.clone(),
            tags: output.tags,
            time_markers: output.time_markers,
        };

        // The full event always lands in blob storage so the run can be
        // retried from it; the published copy is offloaded only when it
        // exceeds the bus threshold.
        let enriched_uri = self
            .offloader
            .write_json(&enriched_event_key(&run.user_id, &run.run_id), &event)
            .await?;

        let title = output.activity.name.clone();
        let description = output.activity.description.clone();
        let uri_for_run = enriched_uri.clone();
        self.store
            .update_pipeline_run(
                &run.run_id,
                Box::new(move |r| {
                    r.title = title;
                    r.description = description;
                    r.enriched_event_uri = Some(uri_for_run);
                    r.pending_input_id = None;
                }),
            )
            .await?;

        if pipeline.destinations.is_empty() {
            self.store
                .set_run_status(&run.run_id, reduce_status(&[]), Some("no destinations".into()))
                .await?;
        }

        let published = self.offloader.offload_enriched(event).await?;
        let envelope = CloudEvent::new("stride.orchestrator", "activity.enriched", &published)?;
        self.bus.publish(TOPIC_ENRICHED_ACTIVITY, envelope).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for Orchestrator {
    async fn handle(&self, delivery: Delivery) -> HandlerOutcome {
        match self.process(&delivery).await {
            Ok(false) => HandlerOutcome::Ack,
            Ok(true) => HandlerOutcome::Nack,
            Err(e) => {
                warn!("orchestrator error (attempt {}): {e:#}", delivery.attempt);
                HandlerOutcome::Nack
            }
        }
    }
}
