//! Filesystem-backed object store.
//!
//! Buckets are directories under a configured root and blob names map onto
//! relative paths. Useful for shared network drives and for tests.

use super::storage::{BlobLocation, BlobMeta, CreateOutcome, ObjectStore};
use crate::config::LocalStoreConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, info, warn};

/// Local directory object store.
pub struct LocalObjectStore {
    config: LocalStoreConfig,
    staging_counter: AtomicU64,
}

impl LocalObjectStore {
    pub fn new(config: LocalStoreConfig) -> Self {
        Self {
            config,
            staging_counter: AtomicU64::new(0),
        }
    }

    fn bucket_path(&self, bucket: &str) -> SyncResult<PathBuf> {
        Ok(self.config.root.join(checked_relative(bucket)?))
    }

    fn blob_path(&self, blob: &BlobLocation) -> SyncResult<PathBuf> {
        Ok(self
            .bucket_path(&blob.bucket)?
            .join(checked_relative(&blob.name)?))
    }

    /// A hidden sibling path to stage content in before linking it into place.
    fn staging_path(&self, target: &Path) -> PathBuf {
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let seq = self.staging_counter.fetch_add(1, Ordering::Relaxed);
        target.with_file_name(format!(".{file_name}.{}.{seq}.tmp", std::process::id()))
    }
}

/// Rejects names that would escape the store root.
fn checked_relative(name: &str) -> SyncResult<&Path> {
    let path = Path::new(name);
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(SyncError::InvalidLocation(format!(
            "{name}: must be a plain relative path"
        )));
    }
    Ok(path)
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn provider_name(&self) -> &'static str {
        "Local Directory"
    }

    async fn list(&self, bucket: &str, prefix: &str) -> SyncResult<Vec<BlobMeta>> {
        let (dir, name_prefix) = match prefix.rfind('/') {
            Some(pos) => (&prefix[..pos], &prefix[pos + 1..]),
            None => ("", prefix),
        };

        let bucket_path = self.bucket_path(bucket)?;
        let dir_path = if dir.is_empty() {
            bucket_path
        } else {
            bucket_path.join(checked_relative(dir)?)
        };

        let mut read_dir = match fs::read_dir(&dir_path).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Nothing to list at {:?}", dir_path);
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(SyncError::Storage(format!(
                    "failed to read directory {dir_path:?}: {e}"
                )));
            }
        };

        let mut blobs = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| SyncError::Storage(format!("failed to read directory entry: {e}")))?
        {
            let file_name = entry.file_name().to_string_lossy().to_string();

            // Skip hidden staging files
            if file_name.starts_with('.') || !file_name.starts_with(name_prefix) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping {:?}: {e}", entry.path());
                    continue;
                }
            };
            if metadata.is_dir() {
                continue;
            }

            let name = &prefix[..prefix.len() - name_prefix.len()];
            blobs.push(BlobMeta {
                location: BlobLocation::new(bucket, format!("{name}{file_name}")),
                size: Some(metadata.len()),
            });
        }

        blobs.sort_by(|a, b| a.location.cmp(&b.location));
        Ok(blobs)
    }

    async fn read_all(&self, blob: &BlobLocation) -> SyncResult<Vec<u8>> {
        let path = self.blob_path(blob)?;
        debug!("Reading {:?}", path);

        fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => SyncError::NotFound(blob.to_string()),
            _ => SyncError::Storage(format!("failed to read {blob}: {e}")),
        })
    }

    async fn create_if_absent(
        &self,
        blob: &BlobLocation,
        content: &[u8],
    ) -> SyncResult<CreateOutcome> {
        let path = self.blob_path(blob)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::Storage(format!("failed to create {parent:?}: {e}")))?;
        }

        // Hard-linking fails if the target exists, so readers never observe a
        // partially written blob and only one writer can win.
        let staging = self.staging_path(&path);
        fs::write(&staging, content)
            .await
            .map_err(|e| SyncError::Storage(format!("failed to stage {blob}: {e}")))?;

        let linked = fs::hard_link(&staging, &path).await;
        if let Err(e) = fs::remove_file(&staging).await {
            warn!("Failed to remove staging file {:?}: {e}", staging);
        }

        match linked {
            Ok(()) => {
                info!("Wrote {} ({} bytes)", blob, content.len());
                Ok(CreateOutcome::Created)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("{} already exists", blob);
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(e) => Err(SyncError::Storage(format!("failed to write {blob}: {e}"))),
        }
    }
}
