//! Annotation object model for annosync.
//!
//! Defines the live, mutable side of synchronization:
//! - [`PathObject`]: one node of the annotation hierarchy (root, annotation, detection)
//! - [`Geometry`]: GeoJSON-style spatial shapes
//! - [`Color`] / [`Classification`]: packed RGB colours and object classes
//! - [`ObjectHierarchy`]: the tree of objects plus its change notifications
//! - [`measurement_to_json`]: measurement values, including non-finite ones
//!
//! Objects serialize to a GeoJSON `Feature`-like JSON object. That serialized
//! form is what the change tracker snapshots and what events carry.

mod color;
mod geometry;
mod hierarchy;
mod measurement;
mod object;

pub use color::Color;
pub use geometry::Geometry;
pub use hierarchy::{
    ChangeOrigin, HierarchyEvent, HierarchyEventKind, HierarchyListener, ObjectHierarchy,
};
pub use measurement::{measurement_from_json, measurement_to_json, same_measurements};
pub use object::{Classification, ObjectKind, PathObject};

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur converting objects to and from their serialized state.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid object state: {0}")]
    InvalidState(String),
}
