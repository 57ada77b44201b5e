use crate::{Color, Geometry, ModelError, ModelResult};
use annosync_types::{ObjectId, ObjectState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// What kind of node an object is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// The hierarchy root. Never serialized into events, never directly editable.
    Root,
    /// A user-drawn region of interest.
    Annotation,
    /// A machine-generated object. Numerous and only tracked for existence.
    Detection,
}

/// An object classification (e.g. "Tumor"), with an optional display colour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
}

impl Classification {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
        }
    }

    #[must_use]
    pub fn with_color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }
}

/// A node of the annotation hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct PathObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub geometry: Option<Geometry>,
    pub name: Option<String>,
    pub color: Option<Color>,
    pub classification: Option<Classification>,
    pub measurements: BTreeMap<String, f64>,
    pub metadata: BTreeMap<String, String>,
}

impl PathObject {
    fn with_kind(kind: ObjectKind, geometry: Option<Geometry>) -> Self {
        Self {
            id: ObjectId::new(),
            kind,
            geometry,
            name: None,
            color: None,
            classification: None,
            measurements: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Creates a hierarchy root.
    #[must_use]
    pub fn root() -> Self {
        Self::with_kind(ObjectKind::Root, None)
    }

    /// Creates an annotation with a fresh id.
    #[must_use]
    pub fn annotation(geometry: Geometry) -> Self {
        Self::with_kind(ObjectKind::Annotation, Some(geometry))
    }

    /// Creates a detection with a fresh id.
    #[must_use]
    pub fn detection(geometry: Geometry) -> Self {
        Self::with_kind(ObjectKind::Detection, Some(geometry))
    }

    #[must_use]
    pub fn with_id(mut self, id: ObjectId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.kind == ObjectKind::Root
    }

    /// Replaces the geometry.
    ///
    /// Derived measurements no longer describe the new shape, so they are cleared.
    pub fn set_geometry(&mut self, geometry: Geometry) {
        self.geometry = Some(geometry);
        self.measurements.clear();
    }

    /// Serializes this object to its tracked state.
    pub fn to_state(&self) -> ModelResult<ObjectState> {
        let feature = Feature {
            feature_type: FEATURE_TYPE.to_string(),
            id: self.id,
            geometry: self.geometry.clone(),
            properties: FeatureProperties {
                object_type: self.kind,
                name: self.name.clone(),
                color: self.color,
                classification: self.classification.clone(),
                measurements: self.measurements.clone(),
                metadata: self.metadata.clone(),
            },
        };

        match serde_json::to_value(feature)? {
            Value::Object(state) => Ok(state),
            other => Err(ModelError::InvalidState(format!(
                "object serialized to a non-object value: {other}"
            ))),
        }
    }

    /// Rebuilds an object from a serialized state.
    pub fn from_state(state: &ObjectState) -> ModelResult<Self> {
        let feature: Feature = serde_json::from_value(Value::Object(state.clone()))?;
        if feature.feature_type != FEATURE_TYPE {
            return Err(ModelError::InvalidState(format!(
                "expected type {FEATURE_TYPE}, got {}",
                feature.feature_type
            )));
        }

        let props = feature.properties;
        Ok(Self {
            id: feature.id,
            kind: props.object_type,
            geometry: feature.geometry,
            name: props.name,
            color: props.color,
            classification: props.classification,
            measurements: props.measurements,
            metadata: props.metadata,
        })
    }
}

const FEATURE_TYPE: &str = "Feature";

#[derive(Serialize, Deserialize)]
struct Feature {
    #[serde(rename = "type")]
    feature_type: String,
    id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    geometry: Option<Geometry>,
    properties: FeatureProperties,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeatureProperties {
    object_type: ObjectKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    classification: Option<Classification>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", with = "crate::measurement")]
    measurements: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}
