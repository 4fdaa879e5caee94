use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;

use crate::BlobError;

/// Immutable opaque byte blobs under `bucket/object` keys. Writes overwrite.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn write(&self, bucket: &str, object: &str, bytes: &[u8]) -> Result<(), BlobError>;
    async fn read(&self, bucket: &str, object: &str) -> Result<Vec<u8>, BlobError>;
    async fn exists(&self, bucket: &str, object: &str) -> Result<bool, BlobError>;
}

pub fn enriched_event_key(user_id: &str, execution_id: &str) -> String {
    format!("enriched_events/{user_id}/{execution_id}.json")
}

pub fn original_payload_key(user_id: &str, activity_id: &str) -> String {
    format!("original_payloads/{user_id}/{activity_id}.json")
}

pub fn mobile_activity_key(user_id: &str, activity_id: &str) -> String {
    format!("mobile_activities/{user_id}/{activity_id}.json")
}

/// Split a `blob://bucket/object` reference into its parts.
pub fn parse_blob_uri(uri: &str) -> Option<(String, String)> {
    let rest = uri.strip_prefix("blob://")?;
    let (bucket, object) = rest.split_once('/')?;
    if bucket.is_empty() || object.is_empty() {
        return None;
    }
    Some((bucket.to_string(), object.to_string()))
}

/// Filesystem-backed blob store. Objects are files under `root/bucket/`.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, object: &str) -> PathBuf {
        self.root.join(bucket).join(object)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn write(&self, bucket: &str, object: &str, bytes: &[u8]) -> Result<(), BlobError> {
        let path = self.object_path(bucket, object);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobError::Transient(e.to_string()))?;
        }
        fs::write(&path, bytes)
            .await
            .map_err(|e| BlobError::Transient(e.to_string()))
    }

    async fn read(&self, bucket: &str, object: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.object_path(bucket, object);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(format!("{bucket}/{object}")))
            }
            Err(e) => Err(BlobError::Transient(e.to_string())),
        }
    }

    async fn exists(&self, bucket: &str, object: &str) -> Result<bool, BlobError> {
        Ok(fs::try_exists(self.object_path(bucket, object))
            .await
            .unwrap_or(false))
    }
}

/// In-memory blob store for tests.
#[derive(Default, Clone)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(bucket: &str, object: &str) -> String {
        format!("{bucket}/{object}")
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn write(&self, bucket: &str, object: &str, bytes: &[u8]) -> Result<(), BlobError> {
        self.objects
            .write()
            .await
            .insert(Self::key(bucket, object), bytes.to_vec());
        Ok(())
    }

    async fn read(&self, bucket: &str, object: &str) -> Result<Vec<u8>, BlobError> {
        self.objects
            .read()
            .await
            .get(&Self::key(bucket, object))
            .cloned()
            .ok_or_else(|| BlobError::NotFound(format!("{bucket}/{object}")))
    }

    async fn exists(&self, bucket: &str, object: &str) -> Result<bool, BlobError> {
        Ok(self
            .objects
            .read()
            .await
            .contains_key(&Self::key(bucket, object)))
    }
}
