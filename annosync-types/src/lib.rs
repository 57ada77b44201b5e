//! Core type definitions for annosync.
//!
//! This crate defines the storage representation of annotation changes:
//! - Object identifiers (UUID v4, as assigned by the viewer)
//! - Change events (create, edit, delete) with an explicit `eventType` discriminator
//! - The newline-delimited JSON codec used for changeset blobs
//!
//! Nothing here knows what an annotation looks like. Event payloads are plain
//! JSON objects; only the applicator in `annosync-sync` interprets their keys.

mod changeset;
mod event;
mod ids;

pub use changeset::{changeset_name, decode_changeset, encode_changeset, parse_changeset_name};
pub use event::{CreateEvent, DeleteEvent, EditEvent, Event, EventType, ObjectState};
pub use ids::ObjectId;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("missing or invalid eventType")]
    MissingEventType,

    #[error("unknown eventType: {0}")]
    UnknownEventType(String),
}
