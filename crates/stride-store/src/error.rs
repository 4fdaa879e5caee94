use thiserror::Error;

/// Blob store failure classes. Callers branch on transience to decide
/// between nack-for-redelivery and a terminal failure.
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("transient blob store error: {0}")]
    Transient(String),
    #[error("permanent blob store error: {0}")]
    Permanent(String),
}

impl BlobError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BlobError::Transient(_))
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether a retry (bus redelivery) can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Conflict(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
