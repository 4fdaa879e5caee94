use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use stride_enrichers::{
    append_paragraph, apply_section, BoosterState, EnrichContext, EnrichOutcome, EnricherRegistry,
    EnrichmentResult,
};
use stride_store::MetadataStore;
use stride_types::{
    BoosterExecution, BoosterStatus, PendingInput, PendingInputStatus, PipelineConfig, PipelineRun,
    StandardizedActivity, TimeMarker, UserRecord,
};

/// Booster-local state backed by the metadata store.
pub struct StoreBoosterState(Arc<dyn MetadataStore>);

impl StoreBoosterState {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self(store)
    }
}

#[async_trait]
impl BoosterState for StoreBoosterState {
    async fn get(&self, user_id: &str, booster_id: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.0.get_booster_data(user_id, booster_id).await?)
    }

    async fn set(&self, user_id: &str, booster_id: &str, value: Value) -> anyhow::Result<()> {
        Ok(self.0.set_booster_data(user_id, booster_id, value).await?)
    }
}

/// Everything a completed chain hands to the destination fan-out.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    pub activity: StandardizedActivity,
    pub applied: Vec<String>,
    pub metadata: HashMap<String, String>,
    pub tags: Vec<String>,
    pub time_markers: Vec<TimeMarker>,
}

#[derive(Debug)]
pub enum ChainVerdict {
    Completed(ChainOutput),
    /// The chain parked on a pending input; the run stays RUNNING.
    Paused { pending_input_id: String },
    /// A retryable enricher failure on the first pass; the driving message
    /// should be nacked so the bus redelivers it.
    RetryRequested { enricher: String, message: String },
    /// A critical enricher failed; the run is FAILED.
    Aborted { enricher: String, message: String },
}

/// Executes a pipeline's enricher chain in declared order against one
/// activity, merging each contribution and appending booster executions to
/// the run as it goes.
pub struct ChainRunner {
    registry: EnricherRegistry,
    store: Arc<dyn MetadataStore>,
}

impl ChainRunner {
    pub fn new(registry: EnricherRegistry, store: Arc<dyn MetadataStore>) -> Self {
        Self { registry, store }
    }

    pub async fn run(
        &self,
        run: &PipelineRun,
        pipeline: &PipelineConfig,
        user: &UserRecord,
        mut activity: StandardizedActivity,
        resolved_input: Option<&PendingInput>,
        do_not_retry: bool,
    ) -> anyhow::Result<ChainVerdict> {
        let state = StoreBoosterState::new(self.store.clone());
        let mut applied: Vec<String> = Vec::new();
        let mut metadata: HashMap<String, String> = HashMap::new();
        let mut tags: Vec<String> = Vec::new();
        let mut time_markers: Vec<TimeMarker> = Vec::new();

        // A resume pass restarts from the original payload. The name,
        // description, and metadata accumulated before the pause are
        // recovered from the run document and its booster rows.
        if !run.boosters.is_empty() {
            if !run.title.is_empty() {
                activity.name = run.title.clone();
            }
            if !run.description.is_empty() {
                activity.description = run.description.clone();
            }
            for booster in &run.boosters {
                if booster.status == BoosterStatus::Success {
                    metadata.extend(booster.metadata.clone());
                    applied.push(booster.provider_name.clone());
                }
            }
        }

        for step in &pipeline.enrichers {
            let name = step.kind.as_str();
            if run.has_booster(name) {
                continue;
            }

            let Some(enricher) = self.registry.get(step.kind) else {
                warn!("enricher {name} not registered; marking failed");
                self.store
                    .append_booster(
                        &run.run_id,
                        failed_row(name, 0, "enricher not registered".to_string()),
                    )
                    .await?;
                if is_critical(step) {
                    return Ok(ChainVerdict::Aborted {
                        enricher: name.to_string(),
                        message: "enricher not registered".to_string(),
                    });
                }
                continue;
            };

            let input_for_step = resolved_input.filter(|i| i.enricher == step.kind);
            let started = Instant::now();
            let ctx = EnrichContext {
                activity: &activity,
                user,
                config: &step.config,
                do_not_retry,
                resolved_input: input_for_step,
                state: &state,
            };

            match enricher.enrich(&ctx).await {
                Ok(EnrichOutcome::Applied(result)) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    metadata.extend(result.metadata.clone());
                    tags.extend(result.tags.iter().cloned());
                    time_markers.extend(result.time_markers.iter().cloned());
                    merge_into_activity(&mut activity, &result);
                    applied.push(name.to_string());
                    self.store
                        .append_booster(
                            &run.run_id,
                            BoosterExecution {
                                provider_name: name.to_string(),
                                status: BoosterStatus::Success,
                                duration_ms,
                                metadata: result.metadata,
                                error: None,
                            },
                        )
                        .await?;
                }
                Ok(EnrichOutcome::Skipped { reason }) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    info!("enricher {name} skipped: {reason}");
                    let mut skip_metadata = HashMap::new();
                    skip_metadata.insert("reason".to_string(), reason);
                    self.store
                        .append_booster(
                            &run.run_id,
                            BoosterExecution {
                                provider_name: name.to_string(),
                                status: BoosterStatus::Skipped,
                                duration_ms,
                                metadata: skip_metadata,
                                error: None,
                            },
                        )
                        .await?;
                }
                Ok(EnrichOutcome::Deferred(deferred)) => {
                    let pending = PendingInput {
                        activity_id: activity.identity_key(),
                        user_id: user.user_id.clone(),
                        status: PendingInputStatus::Waiting,
                        required_fields: deferred.required_fields,
                        input_data: HashMap::new(),
                        created_at: Utc::now(),
                        updated_at: Utc::now(),
                        completed_at: None,
                        auto_populated: false,
                        continued_without_resolution: false,
                        enricher: step.kind,
                        auto_deadline: deferred.auto_deadline,
                        linked_execution_id: Some(run.run_id.clone()),
                        pipeline_id: pipeline.pipeline_id.clone(),
                        original_payload_uri: run.original_payload_uri.clone(),
                        provider_metadata: deferred.provider_metadata,
                    };
                    let pending_id = pending.activity_id.clone();
                    self.store.create_pending_input(pending).await?;

                    let title = activity.name.clone();
                    let description = activity.description.clone();
                    let message =
                        format!("waiting for input ({pending_id}) before {name} can finish");
                    let pending_for_run = pending_id.clone();
                    self.store
                        .update_pipeline_run(
                            &run.run_id,
                            Box::new(move |r| {
                                r.pending_input_id = Some(pending_for_run);
                                r.status_message = Some(message);
                                r.title = title;
                                r.description = description;
                            }),
                        )
                        .await?;
                    info!("chain paused on {name} for pending input {pending_id}");
                    return Ok(ChainVerdict::Paused {
                        pending_input_id: pending_id,
                    });
                }
                Err(e) if e.retryable && !do_not_retry => {
                    return Ok(ChainVerdict::RetryRequested {
                        enricher: name.to_string(),
                        message: e.message,
                    });
                }
                Err(e) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    warn!("enricher {name} failed: {}", e.message);
                    self.store
                        .append_booster(&run.run_id, failed_row(name, duration_ms, e.message.clone()))
                        .await?;
                    if is_critical(step) {
                        return Ok(ChainVerdict::Aborted {
                            enricher: name.to_string(),
                            message: e.message,
                        });
                    }
                }
            }
        }

        Ok(ChainVerdict::Completed(ChainOutput {
            activity,
            applied,
            metadata,
            tags,
            time_markers,
        }))
    }
}

fn is_critical(step: &stride_types::EnricherConfig) -> bool {
    step.config.get("critical").map(|v| v == "true").unwrap_or(false)
}

fn failed_row(name: &str, duration_ms: u64, error: String) -> BoosterExecution {
    BoosterExecution {
        provider_name: name.to_string(),
        status: BoosterStatus::Failed,
        duration_ms,
        metadata: HashMap::new(),
        error: Some(error),
    }
}

/// Merge one enricher contribution into the accumulating activity: the name
/// overwrites only when returned, the description lands as a section
/// (replaced idempotently when headed), a headerless paragraph appends.
fn merge_into_activity(activity: &mut StandardizedActivity, result: &EnrichmentResult) {
    if let Some(name) = &result.name {
        activity.name = name.clone();
    }
    if let Some(body) = &result.description {
        activity.description = match &result.section_header {
            Some(header) => apply_section(&activity.description, header, body),
            None => append_paragraph(&activity.description, body),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overwrites_name_only_when_present() {
        let mut activity = StandardizedActivity {
            source: stride_types::ActivitySource::Strava,
            external_id: "1".to_string(),
            user_id: "u1".to_string(),
            activity_type: stride_types::ActivityType::Run,
            name: "Original".to_string(),
            description: String::new(),
            start_time: Utc::now(),
            sessions: Vec::new(),
        };

        merge_into_activity(
            &mut activity,
            &EnrichmentResult {
                description: Some("A paragraph.".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(activity.name, "Original");
        assert_eq!(activity.description, "A paragraph.");

        merge_into_activity(
            &mut activity,
            &EnrichmentResult {
                name: Some("Renamed".to_string()),
                section_header: Some("🌤️ Weather:".to_string()),
                description: Some("12°C".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(activity.name, "Renamed");
        assert_eq!(activity.description, "A paragraph.\n\n🌤️ Weather:\n12°C");

        // Re-applying the same section replaces rather than appends.
        merge_into_activity(
            &mut activity,
            &EnrichmentResult {
                section_header: Some("🌤️ Weather:".to_string()),
                description: Some("14°C".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(activity.description, "A paragraph.\n\n🌤️ Weather:\n14°C");
    }
}
