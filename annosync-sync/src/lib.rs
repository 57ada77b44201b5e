//! Collaborative annotation sync for annosync.
//!
//! Keeps annotation hierarchies in several viewers consistent through a
//! shared, append-only log of changesets in object storage.
//!
//! # Architecture
//!
//! There is no server. Each changeset is an immutable blob whose name carries
//! a strictly increasing index, and a writer claims the next index with a
//! create-if-absent write. Whoever loses the race catches up and retries, so
//! every viewer sees the same total order of changes.
//!
//! ## Components
//!
//! - **Tracker**: snapshots object state and turns changes into events
//! - **Applicator**: replays remote events onto a hierarchy
//! - **Cloud**: object store backends (Google Cloud Storage, local directory, memory)
//! - **Changeset store**: the log itself, with single-flight sync and
//!   coalesced writes
//! - **Syncer**: wires a hierarchy, a store and a session together
//!
//! ## Sync Process
//!
//! 1. **Track**: a local hierarchy change is diffed against the last snapshot
//! 2. **Write**: events are queued and written as the next changeset
//! 3. **Sync**: changesets newer than the cursor are fetched and decoded
//! 4. **Apply**: remote events are replayed with local tracking paused
//! 5. **Persist**: the new cursor is saved on the viewing session
//!
//! # Example
//!
//! ```
//! use annosync_model::{Geometry, PathObject};
//! use annosync_sync::ChangeTracker;
//! use annosync_types::EventType;
//!
//! let mut tracker = ChangeTracker::new();
//! let object = PathObject::annotation(Geometry::rectangle(0.0, 0.0, 10.0, 10.0));
//!
//! let events = tracker.track_changes([&object]).unwrap();
//! assert_eq!(events[0].event_type(), EventType::Create);
//! ```

pub mod applicator;
pub mod changeset_store;
pub mod cloud;
pub mod config;
mod error;
pub mod registry;
pub mod session;
pub mod syncer;
pub mod tracker;

pub use applicator::EventApplicator;
pub use changeset_store::{ChangesetStore, StoreListener};
pub use cloud::{
    BlobLocation, BlobMeta, CreateOutcome, GcsObjectStore, LocalObjectStore, MemoryObjectStore,
    ObjectStore,
};
pub use config::{
    ChangesetStoreConfig, DEFAULT_CURSOR_PROPERTY, GcsConfig, LocalStoreConfig, SyncerConfig,
};
pub use error::{SyncError, SyncResult};
pub use registry::StoreRegistry;
pub use session::{MemorySession, SessionProperties};
pub use syncer::AnnotationSyncer;
pub use tracker::{ChangeTracker, diff_top_level};
