use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::warn;

use async_trait::async_trait;
use chrono::Utc;
use stride_types::{
    ActivitySource, BoosterExecution, Destination, DestinationOutcome, EnricherKind, PendingInput,
    PendingInputStatus, PipelineConfig, PipelineRun, RunStatus, UploadedActivityRecord, UserRecord,
};

use crate::metadata::{MetadataStore, RunMutation};
use crate::{StoreError, StoreResult};

/// JSON-file-backed metadata store. Each entity family lives in one file
/// under the base dir and is held in an in-memory map behind a `RwLock`;
/// mutations are flushed to disk before returning so a crash never loses an
/// acked write.
pub struct JsonStore {
    base: PathBuf,
    users: RwLock<HashMap<String, UserRecord>>,
    identities: RwLock<HashMap<String, String>>,
    pipelines: RwLock<HashMap<String, Vec<PipelineConfig>>>,
    runs: RwLock<HashMap<String, PipelineRun>>,
    pending: RwLock<HashMap<String, PendingInput>>,
    booster_data: RwLock<HashMap<String, Value>>,
    uploaded: RwLock<HashMap<String, UploadedActivityRecord>>,
}

async fn load_map<T: DeserializeOwned>(path: &Path) -> HashMap<String, T> {
    let Ok(raw) = fs::read_to_string(path).await else {
        return HashMap::new();
    };
    match serde_json::from_str(&raw) {
        Ok(map) => map,
        Err(e) => {
            warn!("ignoring unparseable store file {}: {e}", path.display());
            HashMap::new()
        }
    }
}

impl JsonStore {
    pub async fn new(base: impl AsRef<Path>) -> StoreResult<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).await?;
        Ok(Self {
            users: RwLock::new(load_map(&base.join("users.json")).await),
            identities: RwLock::new(load_map(&base.join("identities.json")).await),
            pipelines: RwLock::new(load_map(&base.join("pipelines.json")).await),
            runs: RwLock::new(load_map(&base.join("pipeline_runs.json")).await),
            pending: RwLock::new(load_map(&base.join("pending_inputs.json")).await),
            booster_data: RwLock::new(load_map(&base.join("booster_data.json")).await),
            uploaded: RwLock::new(load_map(&base.join("uploaded_activities.json")).await),
            base,
        })
    }

    async fn persist<T: Serialize>(&self, file: &str, map: &HashMap<String, T>) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(map)?;
        fs::write(self.base.join(file), json).await?;
        Ok(())
    }

    fn identity_key(source: ActivitySource, external_id: &str) -> String {
        format!("{source}:{external_id}")
    }

    fn booster_key(user_id: &str, booster_id: &str) -> String {
        format!("{user_id}:{booster_id}")
    }

    fn uploaded_key(user_id: &str, destination: Destination, destination_id: &str) -> String {
        format!(
            "{user_id}:{}",
            UploadedActivityRecord::key_for(destination, destination_id)
        )
    }
}

#[async_trait]
impl MetadataStore for JsonStore {
    async fn put_user(&self, user: UserRecord) -> StoreResult<()> {
        let mut users = self.users.write().await;
        users.insert(user.user_id.clone(), user);
        self.persist("users.json", &users).await
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn register_integration_identity(
        &self,
        source: ActivitySource,
        external_id: &str,
        user_id: &str,
    ) -> StoreResult<()> {
        let mut identities = self.identities.write().await;
        identities.insert(Self::identity_key(source, external_id), user_id.to_string());
        self.persist("identities.json", &identities).await
    }

    async fn find_user_by_provider_external_id(
        &self,
        source: ActivitySource,
        external_id: &str,
    ) -> StoreResult<Option<String>> {
        Ok(self
            .identities
            .read()
            .await
            .get(&Self::identity_key(source, external_id))
            .cloned())
    }

    async fn put_pipeline(&self, user_id: &str, pipeline: PipelineConfig) -> StoreResult<()> {
        let mut pipelines = self.pipelines.write().await;
        let list = pipelines.entry(user_id.to_string()).or_default();
        if let Some(existing) = list.iter_mut().find(|p| p.pipeline_id == pipeline.pipeline_id) {
            *existing = pipeline;
        } else {
            list.push(pipeline);
        }
        self.persist("pipelines.json", &pipelines).await
    }

    async fn list_pipelines(&self, user_id: &str) -> StoreResult<Vec<PipelineConfig>> {
        Ok(self
            .pipelines
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_pipeline_run(&self, run: PipelineRun) -> StoreResult<()> {
        let mut runs = self.runs.write().await;
        runs.insert(run.run_id.clone(), run);
        self.persist("pipeline_runs.json", &runs).await
    }

    async fn get_pipeline_run(&self, run_id: &str) -> StoreResult<Option<PipelineRun>> {
        Ok(self.runs.read().await.get(run_id).cloned())
    }

    async fn find_pipeline_run(
        &self,
        user_id: &str,
        activity_id: &str,
        pipeline_id: &str,
    ) -> StoreResult<Option<PipelineRun>> {
        Ok(self
            .runs
            .read()
            .await
            .values()
            .find(|r| {
                r.user_id == user_id && r.activity_id == activity_id && r.pipeline_id == pipeline_id
            })
            .cloned())
    }

    async fn list_pipeline_runs_by_status(
        &self,
        status: RunStatus,
    ) -> StoreResult<Vec<PipelineRun>> {
        Ok(self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn update_pipeline_run(
        &self,
        run_id: &str,
        mutation: RunMutation,
    ) -> StoreResult<PipelineRun> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::NotFound(format!("pipeline run {run_id}")))?;
        mutation(run);
        run.updated_at = Utc::now();
        let updated = run.clone();
        self.persist("pipeline_runs.json", &runs).await?;
        Ok(updated)
    }

    async fn append_booster(&self, run_id: &str, booster: BoosterExecution) -> StoreResult<()> {
        self.update_pipeline_run(run_id, Box::new(move |run| run.boosters.push(booster)))
            .await?;
        Ok(())
    }

    async fn set_destination_outcome(
        &self,
        run_id: &str,
        outcome: DestinationOutcome,
    ) -> StoreResult<PipelineRun> {
        self.update_pipeline_run(
            run_id,
            Box::new(move |run| {
                match run
                    .destinations
                    .iter_mut()
                    .find(|o| o.destination == outcome.destination)
                {
                    Some(existing) => *existing = outcome,
                    None => run.destinations.push(outcome),
                }
            }),
        )
        .await
    }

    async fn set_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        message: Option<String>,
    ) -> StoreResult<()> {
        self.update_pipeline_run(
            run_id,
            Box::new(move |run| {
                run.status = status;
                if message.is_some() {
                    run.status_message = message;
                }
            }),
        )
        .await?;
        Ok(())
    }

    async fn create_pending_input(&self, input: PendingInput) -> StoreResult<()> {
        let mut pending = self.pending.write().await;
        pending.insert(input.activity_id.clone(), input);
        self.persist("pending_inputs.json", &pending).await
    }

    async fn get_pending_input(&self, activity_id: &str) -> StoreResult<Option<PendingInput>> {
        Ok(self.pending.read().await.get(activity_id).cloned())
    }

    async fn update_pending_input(&self, input: PendingInput) -> StoreResult<()> {
        let mut pending = self.pending.write().await;
        if !pending.contains_key(&input.activity_id) {
            return Err(StoreError::NotFound(format!(
                "pending input {}",
                input.activity_id
            )));
        }
        pending.insert(input.activity_id.clone(), input);
        self.persist("pending_inputs.json", &pending).await
    }

    async fn list_pending_inputs(
        &self,
        status: PendingInputStatus,
    ) -> StoreResult<Vec<PendingInput>> {
        Ok(self
            .pending
            .read()
            .await
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect())
    }

    async fn list_pending_inputs_by_enricher(
        &self,
        enricher: EnricherKind,
        status: PendingInputStatus,
    ) -> StoreResult<Vec<PendingInput>> {
        Ok(self
            .pending
            .read()
            .await
            .values()
            .filter(|p| p.enricher == enricher && p.status == status)
            .cloned()
            .collect())
    }

    async fn get_booster_data(
        &self,
        user_id: &str,
        booster_id: &str,
    ) -> StoreResult<Option<Value>> {
        Ok(self
            .booster_data
            .read()
            .await
            .get(&Self::booster_key(user_id, booster_id))
            .cloned())
    }

    async fn set_booster_data(
        &self,
        user_id: &str,
        booster_id: &str,
        data: Value,
    ) -> StoreResult<()> {
        let mut map = self.booster_data.write().await;
        map.insert(Self::booster_key(user_id, booster_id), data);
        self.persist("booster_data.json", &map).await
    }

    async fn set_uploaded_activity(&self, record: UploadedActivityRecord) -> StoreResult<()> {
        let mut uploaded = self.uploaded.write().await;
        uploaded.insert(
            Self::uploaded_key(&record.user_id, record.destination, &record.destination_id),
            record,
        );
        self.persist("uploaded_activities.json", &uploaded).await
    }

    async fn find_uploaded_activity(
        &self,
        user_id: &str,
        destination: Destination,
        destination_id: &str,
    ) -> StoreResult<Option<UploadedActivityRecord>> {
        Ok(self
            .uploaded
            .read()
            .await
            .get(&Self::uploaded_key(user_id, destination, destination_id))
            .cloned())
    }

    async fn increment_sync_count(&self, user_id: &str) -> StoreResult<u32> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;
        user.monthly_sync_count = user.monthly_sync_count.saturating_add(1);
        let count = user.monthly_sync_count;
        self.persist("users.json", &users).await?;
        Ok(count)
    }

    async fn increment_prevented_sync_count(&self, user_id: &str) -> StoreResult<u32> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;
        user.prevented_sync_count = user.prevented_sync_count.saturating_add(1);
        let count = user.prevented_sync_count;
        self.persist("users.json", &users).await?;
        Ok(count)
    }
}
