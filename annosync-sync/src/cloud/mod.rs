//! Object storage backends for changesets.
//!
//! Changesets can live in Google Cloud Storage, in a local (or network-mounted)
//! directory, or in memory.

pub mod gcs;
pub mod local;
pub mod memory;
pub mod storage;

pub use gcs::GcsObjectStore;
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use storage::{BlobLocation, BlobMeta, CreateOutcome, ObjectStore};
