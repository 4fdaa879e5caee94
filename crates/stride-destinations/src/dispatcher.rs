use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{info, warn, Level};

use stride_bus::{Delivery, HandlerOutcome, MessageHandler, Offloader};
use stride_observability::{emit_event, PipelineEvent, Stage};
use stride_orchestrator::reduce_status;
use stride_store::{ExecutionLog, ExecutionRecord, MetadataStore, TriggerType};
use stride_types::{
    DestinationOutcome, EnrichedActivityEvent, OutcomeStatus, Tier, UploadedActivityRecord,
    UserRecord,
};

use crate::{DestinationUploader, UploadError};

/// Monthly sync allowance per tier.
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    pub hobbyist_monthly_limit: u32,
    pub athlete_monthly_limit: u32,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            hobbyist_monthly_limit: 30,
            athlete_monthly_limit: 1000,
        }
    }
}

impl SyncPolicy {
    fn limit_for(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Hobbyist => self.hobbyist_monthly_limit,
            Tier::Athlete => self.athlete_monthly_limit,
        }
    }
}

/// One subscription on the enriched-activity topic: hydrates the event,
/// performs the destination upload, and writes its own outcome lane on the
/// run.
pub struct DestinationSubscriber {
    uploader: Arc<dyn DestinationUploader>,
    store: Arc<dyn MetadataStore>,
    offloader: Offloader,
    execution_log: Arc<ExecutionLog>,
    policy: SyncPolicy,
}

impl DestinationSubscriber {
    pub fn new(
        uploader: Arc<dyn DestinationUploader>,
        store: Arc<dyn MetadataStore>,
        offloader: Offloader,
        execution_log: Arc<ExecutionLog>,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            uploader,
            store,
            offloader,
            execution_log,
            policy,
        }
    }

    pub fn subscription_name(&self) -> String {
        format!("destination-{}", self.uploader.destination())
    }

    async fn process(&self, delivery: &Delivery) -> anyhow::Result<HandlerOutcome> {
        let destination = self.uploader.destination();
        let event: EnrichedActivityEvent = delivery.event.decode()?;
        if !event.destinations.contains(&destination) {
            return Ok(HandlerOutcome::Ack);
        }
        let event = self.offloader.hydrate_enriched(event).await?;
        let activity = event
            .activity
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("enriched event without activity after hydration"))?;

        let run_id = event.pipeline_execution_id.clone();
        let Some(run) = self.store.get_pipeline_run(&run_id).await? else {
            // The run write may still be flushing; redelivery will find it.
            warn!("no run {run_id} for enriched event; requesting redelivery");
            return Ok(HandlerOutcome::Nack);
        };

        // Idempotency on redelivery: our lane already has a terminal
        // outcome, so the upload must not repeat.
        if let Some(outcome) = run.outcome(destination) {
            if outcome.status != OutcomeStatus::Pending {
                return Ok(HandlerOutcome::Ack);
            }
        }

        let Some(mut user) = self.store.get_user(&event.user_id).await? else {
            warn!("enriched event for unknown user {}", event.user_id);
            return Ok(HandlerOutcome::Ack);
        };
        self.maybe_reset_monthly_counter(&mut user).await?;

        let record = ExecutionRecord::start(
            format!("destination.{destination}"),
            TriggerType::BusMessage,
        )
        .with_user(&user.user_id)
        .with_execution(&run_id);

        if user.monthly_sync_count >= self.policy.limit_for(user.tier) {
            info!(
                "monthly sync limit reached for {}; skipping {destination}",
                user.user_id
            );
            self.store.increment_prevented_sync_count(&user.user_id).await?;
            self.finish_outcome(
                &run_id,
                DestinationOutcome {
                    destination,
                    status: OutcomeStatus::Skipped,
                    external_id: None,
                    error: Some("monthly sync limit reached".to_string()),
                    completed_at: Some(Utc::now()),
                },
            )
            .await?;
            let _ = self
                .execution_log
                .append(&record.succeed(Some("skipped: sync limit".to_string())))
                .await;
            return Ok(HandlerOutcome::Ack);
        }

        match self.uploader.upload(&user, &event).await {
            Ok(result) => {
                self.store
                    .set_uploaded_activity(UploadedActivityRecord {
                        destination,
                        destination_id: result.external_id.clone(),
                        user_id: user.user_id.clone(),
                        source: activity.source,
                        source_external_id: activity.external_id.clone(),
                        start_time: activity.start_time,
                        uploaded_at: Utc::now(),
                    })
                    .await?;
                self.finish_outcome(
                    &run_id,
                    DestinationOutcome {
                        destination,
                        status: OutcomeStatus::Success,
                        external_id: Some(result.external_id.clone()),
                        error: None,
                        completed_at: Some(Utc::now()),
                    },
                )
                .await?;
                self.store.increment_sync_count(&user.user_id).await?;
                let _ = self
                    .execution_log
                    .append(&record.succeed(Some(format!("uploaded as {}", result.external_id))))
                    .await;
                Ok(HandlerOutcome::Ack)
            }
            Err(UploadError::Skipped(reason)) => {
                self.finish_outcome(
                    &run_id,
                    DestinationOutcome {
                        destination,
                        status: OutcomeStatus::Skipped,
                        external_id: None,
                        error: Some(reason.clone()),
                        completed_at: Some(Utc::now()),
                    },
                )
                .await?;
                let _ = self
                    .execution_log
                    .append(&record.succeed(Some(format!("skipped: {reason}"))))
                    .await;
                Ok(HandlerOutcome::Ack)
            }
            Err(UploadError::Transient(message)) => {
                warn!("{destination} upload transient failure: {message}");
                let _ = self.execution_log.append(&record.fail(message)).await;
                // Outcome stays PENDING; the reducer keeps the run
                // non-terminal while the bus retries within its bound.
                Ok(HandlerOutcome::Nack)
            }
            Err(e @ (UploadError::Permanent(_) | UploadError::AuthExpired)) => {
                let message = e.to_string();
                warn!("{destination} upload permanent failure: {message}");
                self.finish_outcome(
                    &run_id,
                    DestinationOutcome {
                        destination,
                        status: OutcomeStatus::Failed,
                        external_id: None,
                        error: Some(message.clone()),
                        completed_at: Some(Utc::now()),
                    },
                )
                .await?;
                let _ = self.execution_log.append(&record.fail(message)).await;
                Ok(HandlerOutcome::Ack)
            }
        }
    }

    /// Write this destination's outcome, then re-derive the run status.
    async fn finish_outcome(
        &self,
        run_id: &str,
        outcome: DestinationOutcome,
    ) -> anyhow::Result<()> {
        let outcome_status = outcome.status;
        let destination = outcome.destination;
        let error = outcome.error.clone();
        let updated = self.store.set_destination_outcome(run_id, outcome).await?;
        let status = reduce_status(&updated.destinations);
        self.store.set_run_status(run_id, status, None).await?;

        let level = if outcome_status == OutcomeStatus::Failed {
            Level::ERROR
        } else {
            Level::INFO
        };
        emit_event(
            level,
            PipelineEvent {
                user_id: Some(&updated.user_id),
                pipeline_id: Some(&updated.pipeline_id),
                run_id: Some(run_id),
                activity_id: Some(&updated.activity_id),
                destination: Some(destination.as_str()),
                status: Some(outcome_status.as_str()),
                detail: error.as_deref(),
                ..PipelineEvent::new(Stage::Destination, "destination.outcome")
            },
        );
        Ok(())
    }

    async fn maybe_reset_monthly_counter(&self, user: &mut UserRecord) -> anyhow::Result<()> {
        let now = Utc::now();
        let due = user.sync_count_reset_at.map(|t| t <= now).unwrap_or(false);
        if due {
            user.monthly_sync_count = 0;
            user.sync_count_reset_at = Some(now + Duration::days(30));
            self.store.put_user(user.clone()).await?;
        } else if user.sync_count_reset_at.is_none() {
            user.sync_count_reset_at = Some(now + Duration::days(30));
            self.store.put_user(user.clone()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for DestinationSubscriber {
    async fn handle(&self, delivery: Delivery) -> HandlerOutcome {
        match self.process(&delivery).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "destination {} handler error (attempt {}): {e:#}",
                    self.uploader.destination(),
                    delivery.attempt
                );
                HandlerOutcome::Nack
            }
        }
    }
}
