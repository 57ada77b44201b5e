//! Configuration for stores and the synchronizer.

use annosync_model::ObjectKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default session property holding the last applied changeset index.
pub const DEFAULT_CURSOR_PROPERTY: &str = "annosync.lastChangesetId";

/// Google Cloud Storage JSON API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcsConfig {
    /// Base URL for metadata and media reads (e.g. `https://storage.googleapis.com`).
    pub api_base_url: String,
    /// Base URL for uploads. Usually the same host as `api_base_url`.
    pub upload_base_url: String,
    /// OAuth2 bearer token. Requests are sent unauthenticated when absent.
    pub access_token: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://storage.googleapis.com".to_string(),
            upload_base_url: "https://storage.googleapis.com".to_string(),
            access_token: None,
            timeout_secs: 60,
        }
    }
}

impl GcsConfig {
    /// Points both API and upload endpoints at `base_url` (emulators, tests).
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            api_base_url: base_url.clone(),
            upload_base_url: base_url,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

/// Configuration for the filesystem-backed object store.
///
/// Each bucket is a directory directly under `root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStoreConfig {
    pub root: PathBuf,
}

impl LocalStoreConfig {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// Synchronizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncerConfig {
    /// Session property the changeset cursor is persisted under.
    pub cursor_property: String,
    /// Object kinds whose full state is snapshotted and diffed. Others are
    /// only tracked for existence.
    pub diffable_kinds: Vec<ObjectKind>,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            cursor_property: DEFAULT_CURSOR_PROPERTY.to_string(),
            diffable_kinds: vec![ObjectKind::Annotation],
        }
    }
}

/// Changeset store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangesetStoreConfig {
    /// `gs://bucket/prefix` root the changesets live under.
    pub root: String,
    /// Highest changeset index already applied locally.
    #[serde(default)]
    pub initial_cursor: u64,
}

impl ChangesetStoreConfig {
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            initial_cursor: 0,
        }
    }

    #[must_use]
    pub fn with_cursor(mut self, cursor: u64) -> Self {
        self.initial_cursor = cursor;
        self
    }
}
