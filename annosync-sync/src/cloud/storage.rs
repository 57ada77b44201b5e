//! Object storage abstraction.
//!
//! Changesets live as immutable blobs in a flat bucket namespace. The only
//! write primitive is an atomic create-if-absent, which is what makes index
//! allocation safe across uncoordinated writers.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

const GS_SCHEME: &str = "gs://";

/// A blob (or blob-name prefix) inside a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobLocation {
    pub bucket: String,
    pub name: String,
}

impl BlobLocation {
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
        }
    }

    /// Parses a `gs://bucket/name` URI.
    ///
    /// The name may be empty (`gs://bucket` and `gs://bucket/` both address the
    /// bucket root).
    pub fn parse(uri: &str) -> SyncResult<Self> {
        let rest = uri.strip_prefix(GS_SCHEME).ok_or_else(|| {
            SyncError::InvalidLocation(format!("{uri}: expected a {GS_SCHEME} URI"))
        })?;

        let (bucket, name) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(SyncError::InvalidLocation(format!("{uri}: missing bucket")));
        }

        Ok(Self::new(bucket, name))
    }

    /// Treats this location as a directory: the name gains a trailing `/`
    /// unless it is empty or already has one.
    #[must_use]
    pub fn as_prefix(&self) -> Self {
        if self.name.is_empty() || self.name.ends_with('/') {
            return self.clone();
        }
        Self::new(self.bucket.clone(), format!("{}/", self.name))
    }

    /// A blob directly under this prefix.
    #[must_use]
    pub fn child(&self, file_name: &str) -> Self {
        Self::new(self.bucket.clone(), format!("{}{file_name}", self.name))
    }

    #[must_use]
    pub fn gs_uri(&self) -> String {
        format!("{GS_SCHEME}{}/{}", self.bucket, self.name)
    }
}

impl fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.gs_uri())
    }
}

/// Listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMeta {
    pub location: BlobLocation,
    pub size: Option<u64>,
}

/// Result of a create-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// Another writer got there first. Not an error: callers retry elsewhere.
    AlreadyExists,
}

/// Abstract object store interface.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns the name of the storage provider.
    fn provider_name(&self) -> &'static str;

    /// Lists blobs whose names start with `prefix`, one directory level deep:
    /// names with a further `/` after the prefix are not returned.
    async fn list(&self, bucket: &str, prefix: &str) -> SyncResult<Vec<BlobMeta>>;

    /// Reads a whole blob.
    async fn read_all(&self, blob: &BlobLocation) -> SyncResult<Vec<u8>>;

    /// Writes a blob only if no blob of that name exists, atomically.
    async fn create_if_absent(
        &self,
        blob: &BlobLocation,
        content: &[u8],
    ) -> SyncResult<CreateOutcome>;
}

/// True if `name` is directly under `prefix` (no further `/`).
pub(crate) fn is_direct_child(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
}
