use std::sync::Arc;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use stride_store::{enriched_event_key, original_payload_key, parse_blob_uri, BlobStore};
use stride_types::{ActivityPayload, EnrichedActivityEvent};

/// Offload threshold: half the bus's ~10 MiB ceiling, leaving headroom for
/// envelope overhead.
pub const DEFAULT_OFFLOAD_THRESHOLD: usize = 5 * 1024 * 1024;

/// Spills oversized message bodies to blob storage and re-hydrates them on
/// the consuming side. The blob holds the complete event; the published
/// copy carries only the URI.
#[derive(Clone)]
pub struct Offloader {
    blob: Arc<dyn BlobStore>,
    bucket: String,
    threshold: usize,
}

impl Offloader {
    pub fn new(blob: Arc<dyn BlobStore>, bucket: impl Into<String>, threshold: usize) -> Self {
        Self {
            blob,
            bucket: bucket.into(),
            threshold,
        }
    }

    pub fn uri_for(&self, object: &str) -> String {
        format!("blob://{}/{}", self.bucket, object)
    }

    pub async fn write_json<T: Serialize>(&self, object: &str, value: &T) -> anyhow::Result<String> {
        let bytes = serde_json::to_vec(value)?;
        self.blob
            .write(&self.bucket, object, &bytes)
            .await
            .with_context(|| format!("writing blob {object}"))?;
        Ok(self.uri_for(object))
    }

    pub async fn read_json<T: DeserializeOwned>(&self, uri: &str) -> anyhow::Result<T> {
        let (bucket, object) =
            parse_blob_uri(uri).ok_or_else(|| anyhow::anyhow!("malformed blob uri: {uri}"))?;
        let bytes = self
            .blob
            .read(&bucket, &object)
            .await
            .with_context(|| format!("reading blob {uri}"))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Apply the offload rule to an enriched event before publishing.
    pub async fn offload_enriched(
        &self,
        event: EnrichedActivityEvent,
    ) -> anyhow::Result<EnrichedActivityEvent> {
        let size = serde_json::to_vec(&event)?.len();
        if size <= self.threshold {
            return Ok(event);
        }
        let object = enriched_event_key(&event.user_id, &event.pipeline_execution_id);
        let uri = self.write_json(&object, &event).await?;
        debug!(
            "offloaded enriched event {} ({} bytes) to {uri}",
            event.pipeline_execution_id, size
        );
        let mut shallow = event;
        shallow.activity = None;
        shallow.activity_data_uri = Some(uri);
        Ok(shallow)
    }

    /// Resolve an enriched event on the consuming side. No-op when the
    /// activity is inline.
    pub async fn hydrate_enriched(
        &self,
        event: EnrichedActivityEvent,
    ) -> anyhow::Result<EnrichedActivityEvent> {
        if event.activity.is_some() {
            return Ok(event);
        }
        let uri = event
            .activity_data_uri
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("enriched event carries neither data nor uri"))?;
        self.read_json(uri).await
    }

    /// Apply the offload rule to a raw activity payload before publishing.
    pub async fn offload_raw(&self, payload: ActivityPayload) -> anyhow::Result<ActivityPayload> {
        let size = serde_json::to_vec(&payload)?.len();
        if size <= self.threshold {
            return Ok(payload);
        }
        let activity_id = payload
            .activity
            .as_ref()
            .map(|a| a.identity_key())
            .ok_or_else(|| anyhow::anyhow!("oversized payload with no inline activity"))?;
        let object = original_payload_key(&payload.user_id, &activity_id);
        let uri = self.write_json(&object, &payload).await?;
        debug!("offloaded raw payload {activity_id} ({size} bytes) to {uri}");
        let mut shallow = payload;
        shallow.activity = None;
        shallow.activity_data_uri = Some(uri);
        Ok(shallow)
    }

    pub async fn hydrate_raw(&self, payload: ActivityPayload) -> anyhow::Result<ActivityPayload> {
        if payload.activity.is_some() {
            return Ok(payload);
        }
        let uri = payload
            .activity_data_uri
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("raw payload carries neither data nor uri"))?;
        self.read_json(uri).await
    }
}
