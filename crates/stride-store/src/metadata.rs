use async_trait::async_trait;
use serde_json::Value;

use stride_types::{
    ActivitySource, BoosterExecution, Destination, DestinationOutcome, PendingInput,
    PendingInputStatus, PipelineConfig, PipelineRun, RunStatus, UploadedActivityRecord, UserRecord,
};

use crate::StoreResult;

/// Closure applied to a run under the store's write lock. The store bumps
/// `updated_at` after the mutation, so concurrent writers that touch
/// disjoint fields (boosters vs. destination outcomes vs. status) never
/// clobber each other.
pub type RunMutation = Box<dyn FnOnce(&mut PipelineRun) + Send>;

/// Typed CRUD over the entities owned by a user, plus the cross-user
/// integration-identity index used to route incoming webhooks.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    // -- users -------------------------------------------------------------
    async fn put_user(&self, user: UserRecord) -> StoreResult<()>;
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>>;
    /// `(provider, provider_user_id) → user_id` routing index.
    async fn register_integration_identity(
        &self,
        source: ActivitySource,
        external_id: &str,
        user_id: &str,
    ) -> StoreResult<()>;
    async fn find_user_by_provider_external_id(
        &self,
        source: ActivitySource,
        external_id: &str,
    ) -> StoreResult<Option<String>>;

    // -- pipelines ---------------------------------------------------------
    async fn put_pipeline(&self, user_id: &str, pipeline: PipelineConfig) -> StoreResult<()>;
    async fn list_pipelines(&self, user_id: &str) -> StoreResult<Vec<PipelineConfig>>;

    // -- pipeline runs -----------------------------------------------------
    async fn create_pipeline_run(&self, run: PipelineRun) -> StoreResult<()>;
    async fn get_pipeline_run(&self, run_id: &str) -> StoreResult<Option<PipelineRun>>;
    /// The run (if any) for one `(user, activity, pipeline)` triple.
    async fn find_pipeline_run(
        &self,
        user_id: &str,
        activity_id: &str,
        pipeline_id: &str,
    ) -> StoreResult<Option<PipelineRun>>;
    /// All runs currently in `status`, across users. Used by the lag
    /// watchdog.
    async fn list_pipeline_runs_by_status(
        &self,
        status: RunStatus,
    ) -> StoreResult<Vec<PipelineRun>>;
    /// General read-modify-write; prefer the field-scoped writers below.
    async fn update_pipeline_run(&self, run_id: &str, mutation: RunMutation) -> StoreResult<PipelineRun>;
    /// Chain-runner lane: append one booster execution.
    async fn append_booster(&self, run_id: &str, booster: BoosterExecution) -> StoreResult<()>;
    /// Uploader lane: replace only this destination's outcome entry.
    async fn set_destination_outcome(
        &self,
        run_id: &str,
        outcome: DestinationOutcome,
    ) -> StoreResult<PipelineRun>;
    /// Reducer lane: status and status message only.
    async fn set_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        message: Option<String>,
    ) -> StoreResult<()>;

    // -- pending inputs ----------------------------------------------------
    async fn create_pending_input(&self, input: PendingInput) -> StoreResult<()>;
    async fn get_pending_input(&self, activity_id: &str) -> StoreResult<Option<PendingInput>>;
    async fn update_pending_input(&self, input: PendingInput) -> StoreResult<()>;
    async fn list_pending_inputs(
        &self,
        status: PendingInputStatus,
    ) -> StoreResult<Vec<PendingInput>>;
    async fn list_pending_inputs_by_enricher(
        &self,
        enricher: stride_types::EnricherKind,
        status: PendingInputStatus,
    ) -> StoreResult<Vec<PendingInput>>;

    // -- booster-local state ----------------------------------------------
    async fn get_booster_data(&self, user_id: &str, booster_id: &str)
        -> StoreResult<Option<Value>>;
    async fn set_booster_data(
        &self,
        user_id: &str,
        booster_id: &str,
        data: Value,
    ) -> StoreResult<()>;

    // -- uploaded activities (loop prevention) ------------------------------
    async fn set_uploaded_activity(&self, record: UploadedActivityRecord) -> StoreResult<()>;
    async fn find_uploaded_activity(
        &self,
        user_id: &str,
        destination: Destination,
        destination_id: &str,
    ) -> StoreResult<Option<UploadedActivityRecord>>;

    // -- counters ----------------------------------------------------------
    async fn increment_sync_count(&self, user_id: &str) -> StoreResult<u32>;
    async fn increment_prevented_sync_count(&self, user_id: &str) -> StoreResult<u32>;
}
