//! Error types for the sync layer.

use annosync_model::ModelError;
use std::sync::Arc;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Authentication error.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Blob or bucket not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A changeset root that isn't a `gs://bucket/prefix` URI.
    #[error("invalid storage location: {0}")]
    InvalidLocation(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Event encoding error.
    #[error("event codec error: {0}")]
    Codec(#[from] annosync_types::Error),

    /// Object model error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// No async runtime to run background work on.
    #[error("runtime unavailable: {0}")]
    Runtime(String),

    /// A shared sync run failed; every waiter sees the same error.
    #[error("sync failed: {0}")]
    SyncFailed(Arc<SyncError>),
}
