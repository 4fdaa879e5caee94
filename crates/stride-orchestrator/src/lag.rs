use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{warn, Level};

use stride_bus::{Delivery, HandlerOutcome, MessageHandler};
use stride_observability::{emit_event, PipelineEvent, Stage};
use stride_store::{ExecutionLog, ExecutionRecord, MetadataStore, TriggerType};
use stride_types::RunStatus;

/// Consumer of the enrichment-lag topic. On every tick it surfaces runs
/// that have sat in RUNNING beyond the threshold, so an operator can see
/// stuck executions without digging through the store.
pub struct EnrichmentLagMonitor {
    store: Arc<dyn MetadataStore>,
    execution_log: Arc<ExecutionLog>,
    threshold: Duration,
}

impl EnrichmentLagMonitor {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        execution_log: Arc<ExecutionLog>,
        threshold: Duration,
    ) -> Self {
        Self {
            store,
            execution_log,
            threshold,
        }
    }

    async fn scan(&self) -> anyhow::Result<usize> {
        let cutoff = Utc::now() - self.threshold;
        let stuck: Vec<_> = self
            .store
            .list_pipeline_runs_by_status(RunStatus::Running)
            .await?
            .into_iter()
            .filter(|r| r.updated_at < cutoff)
            .collect();

        for run in &stuck {
            let since = run.updated_at.to_rfc3339();
            emit_event(
                Level::WARN,
                PipelineEvent {
                    user_id: Some(&run.user_id),
                    pipeline_id: Some(&run.pipeline_id),
                    run_id: Some(&run.run_id),
                    activity_id: Some(&run.activity_id),
                    status: Some("stalled"),
                    detail: Some(&since),
                    ..PipelineEvent::new(Stage::Watchdog, "run.stalled")
                },
            );
            warn!(
                "run {} for {} has been RUNNING since {} ({})",
                run.run_id,
                run.activity_id,
                run.updated_at,
                run.status_message.as_deref().unwrap_or("no status message")
            );
            let record = ExecutionRecord::start("enrichment_lag", TriggerType::Watchdog)
                .with_user(&run.user_id)
                .with_execution(&run.run_id)
                .succeed(Some(format!(
                    "stuck in RUNNING since {}",
                    run.updated_at.to_rfc3339()
                )));
            let _ = self.execution_log.append(&record).await;
        }
        Ok(stuck.len())
    }
}

#[async_trait]
impl MessageHandler for EnrichmentLagMonitor {
    async fn handle(&self, _delivery: Delivery) -> HandlerOutcome {
        if let Err(e) = self.scan().await {
            warn!("enrichment lag scan failed: {e:#}");
        }
        HandlerOutcome::Ack
    }
}
