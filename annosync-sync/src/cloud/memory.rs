//! In-memory object store.
//!
//! Counts calls and can hold listings open, which lets callers observe how
//! many round-trips the changeset store makes.

use super::storage::{BlobLocation, BlobMeta, CreateOutcome, ObjectStore, is_direct_child};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use tokio::sync::watch;

/// Object store backed by a map.
pub struct MemoryObjectStore {
    blobs: RwLock<BTreeMap<BlobLocation, Vec<u8>>>,
    list_calls: AtomicUsize,
    read_calls: AtomicUsize,
    create_calls: AtomicUsize,
    offline: AtomicBool,
    listing_open: watch::Sender<bool>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(BTreeMap::new()),
            list_calls: AtomicUsize::new(0),
            read_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            offline: AtomicBool::new(false),
            listing_open: watch::Sender::new(true),
        }
    }

    /// Stores a blob unconditionally, bypassing call accounting.
    pub fn insert(&self, blob: BlobLocation, content: impl Into<Vec<u8>>) {
        self.write_blobs().insert(blob, content.into());
    }

    pub fn get(&self, blob: &BlobLocation) -> Option<Vec<u8>> {
        self.read_blobs().get(blob).cloned()
    }

    /// All blob locations, sorted.
    pub fn locations(&self) -> Vec<BlobLocation> {
        self.read_blobs().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read_blobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_blobs().is_empty()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// While offline every operation fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes `list` calls wait (after being counted) until [`Self::resume_listing`].
    pub fn pause_listing(&self) {
        self.listing_open.send_replace(false);
    }

    pub fn resume_listing(&self) {
        self.listing_open.send_replace(true);
    }

    fn check_online(&self, op: &str) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Network(format!("{op} failed: store is offline")));
        }
        Ok(())
    }

    fn read_blobs(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<BlobLocation, Vec<u8>>> {
        self.blobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_blobs(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<BlobLocation, Vec<u8>>> {
        self.blobs.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn provider_name(&self) -> &'static str {
        "Memory"
    }

    async fn list(&self, bucket: &str, prefix: &str) -> SyncResult<Vec<BlobMeta>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let mut open = self.listing_open.subscribe();
        // The sender lives as long as `self`, so this cannot fail while borrowed.
        let _ = open.wait_for(|open| *open).await;

        self.check_online("list")?;
        Ok(self
            .read_blobs()
            .iter()
            .filter(|(location, _)| {
                location.bucket == bucket && is_direct_child(&location.name, prefix)
            })
            .map(|(location, content)| BlobMeta {
                location: location.clone(),
                size: Some(content.len() as u64),
            })
            .collect())
    }

    async fn read_all(&self, blob: &BlobLocation) -> SyncResult<Vec<u8>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online("read")?;
        self.get(blob)
            .ok_or_else(|| SyncError::NotFound(blob.to_string()))
    }

    async fn create_if_absent(
        &self,
        blob: &BlobLocation,
        content: &[u8],
    ) -> SyncResult<CreateOutcome> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online("create")?;

        let mut blobs = self.write_blobs();
        if blobs.contains_key(blob) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        blobs.insert(blob.clone(), content.to_vec());
        Ok(CreateOutcome::Created)
    }
}
