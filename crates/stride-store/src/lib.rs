//! Storage for the Stride pipeline: typed metadata CRUD, opaque blob I/O,
//! and the append-only execution log.
//!
//! Handlers depend on the `MetadataStore` and `BlobStore` traits; the
//! engine wires in the JSON-file-backed implementations, tests usually use
//! the in-memory blob store plus a `JsonStore` in a tempdir.

mod blob;
mod error;
mod execution_log;
mod json_store;
mod metadata;

pub use blob::{
    enriched_event_key, mobile_activity_key, original_payload_key, parse_blob_uri, BlobStore,
    FsBlobStore, MemoryBlobStore,
};
pub use error::{BlobError, StoreError, StoreResult};
pub use execution_log::{ExecutionLog, ExecutionRecord, ExecutionStatus, TriggerType};
pub use json_store::JsonStore;
pub use metadata::{MetadataStore, RunMutation};
