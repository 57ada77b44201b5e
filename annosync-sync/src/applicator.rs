//! Event applicator - replays change events onto an object hierarchy.
//!
//! Mutations are made silently and announced with a single structural change
//! notification tagged [`ChangeOrigin::Replay`] once the whole batch is done.
//! Events that cannot apply (unknown ids, duplicate creates, protected kinds)
//! are logged and skipped; one bad event never aborts the batch.

use annosync_model::{
    ChangeOrigin, Classification, Color, Geometry, ObjectHierarchy, ObjectKind, PathObject,
    measurement_from_json, same_measurements,
};
use annosync_types::{CreateEvent, DeleteEvent, EditEvent, Event, ObjectId, ObjectState};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, error, trace, warn};

/// Applies change events to an object hierarchy.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventApplicator;

impl EventApplicator {
    pub fn new() -> Self {
        Self
    }

    /// Applies a batch of events in order.
    ///
    /// Returns true if the hierarchy was modified, in which case exactly one
    /// notification has been fired.
    pub fn apply_events(&self, events: &[Event], hierarchy: &mut ObjectHierarchy) -> bool {
        // Ids present as of the event being applied. Objects themselves are
        // fetched from the hierarchy, which is keyed by the same ids.
        let mut known: HashSet<ObjectId> =
            hierarchy.all_objects(true).map(|object| object.id).collect();

        let mut applied = false;
        for event in events {
            trace!("Applying {} event to {}", event.event_type(), event.id());
            applied |= match event {
                Event::Create(create) => self.apply_create(create, hierarchy, &mut known),
                Event::Edit(edit) => self.apply_edit(edit, hierarchy, &known),
                Event::Delete(delete) => self.apply_delete(delete, hierarchy, &mut known),
            };
        }

        if applied {
            hierarchy.fire_hierarchy_changed(ChangeOrigin::Replay);
        }
        applied
    }

    fn apply_create(
        &self,
        event: &CreateEvent,
        hierarchy: &mut ObjectHierarchy,
        known: &mut HashSet<ObjectId>,
    ) -> bool {
        if known.contains(&event.id) {
            warn!("Object {} already exists, skipping create", event.id);
            return false;
        }

        let object = match PathObject::from_state(&event.fields) {
            Ok(object) => object.with_id(event.id),
            Err(e) => {
                error!("Cannot build object {} from create event: {e}", event.id);
                return false;
            }
        };

        if !hierarchy.add_object(object, false) {
            return false;
        }
        known.insert(event.id);
        debug!("Created object {}", event.id);
        true
    }

    fn apply_edit(
        &self,
        event: &EditEvent,
        hierarchy: &mut ObjectHierarchy,
        known: &HashSet<ObjectId>,
    ) -> bool {
        let object = match hierarchy.get_mut(&event.id) {
            Some(object) if known.contains(&event.id) => object,
            _ => {
                warn!("Object {} not found, skipping edit", event.id);
                return false;
            }
        };

        match object.kind {
            ObjectKind::Annotation => apply_diff(object, &event.diff),
            kind @ (ObjectKind::Detection | ObjectKind::Root) => {
                error!("Refusing to edit {} object {}", kind_name(kind), event.id);
                false
            }
        }
    }

    fn apply_delete(
        &self,
        event: &DeleteEvent,
        hierarchy: &mut ObjectHierarchy,
        known: &mut HashSet<ObjectId>,
    ) -> bool {
        if !known.contains(&event.id) {
            warn!("Object {} not found, skipping delete", event.id);
            return false;
        }
        if hierarchy.root().id == event.id {
            error!("Refusing to delete the hierarchy root");
            return false;
        }

        known.remove(&event.id);
        let removed = hierarchy.remove_object(&event.id, false).is_some();
        if removed {
            debug!("Deleted object {}", event.id);
        }
        removed
    }
}

fn kind_name(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Root => "root",
        ObjectKind::Annotation => "annotation",
        ObjectKind::Detection => "detection",
    }
}

/// Properties applied in this order, before any others in the diff.
const PROPERTY_ORDER: [&str; 5] = ["name", "color", "classification", "measurements", "metadata"];

/// Applies a top-level diff, geometry first.
fn apply_diff(object: &mut PathObject, diff: &ObjectState) -> bool {
    let mut applied = false;

    match diff.get("geometry") {
        None | Some(Value::Null) => {}
        Some(value) => match serde_json::from_value::<Geometry>(value.clone()) {
            Ok(geometry) => {
                if object.geometry.as_ref() != Some(&geometry) {
                    object.set_geometry(geometry);
                    applied = true;
                }
            }
            Err(e) => error!("Invalid geometry for {}: {e}", object.id),
        },
    }

    match diff.get("properties") {
        None | Some(Value::Null) => {}
        Some(Value::Object(properties)) => {
            for key in PROPERTY_ORDER {
                if let Some(value) = properties.get(key) {
                    applied |= apply_property(object, key, value);
                }
            }
            for (key, value) in properties {
                if !PROPERTY_ORDER.contains(&key.as_str()) {
                    applied |= apply_property(object, key, value);
                }
            }
        }
        Some(other) => error!("Properties for {} are not an object: {other}", object.id),
    }

    applied
}

fn apply_property(object: &mut PathObject, key: &str, value: &Value) -> bool {
    match key {
        "name" => {
            let name = match value {
                Value::Null => None,
                Value::String(name) => Some(name.clone()),
                other => {
                    error!("Name for {} is not a string: {other}", object.id);
                    return false;
                }
            };
            replace_if_changed(&mut object.name, name)
        }
        "color" => {
            let color = match value {
                Value::Null => None,
                other => match Color::from_json(other) {
                    Some(color) => Some(color),
                    None => return false,
                },
            };
            replace_if_changed(&mut object.color, color)
        }
        "classification" => {
            let classification = match value {
                Value::Null => None,
                other => match serde_json::from_value::<Classification>(other.clone()) {
                    Ok(classification) => Some(classification),
                    Err(e) => {
                        error!("Invalid classification for {}: {e}", object.id);
                        return false;
                    }
                },
            };
            replace_if_changed(&mut object.classification, classification)
        }
        "measurements" => match value.as_object() {
            Some(entries) => {
                let measurements = decode_measurements(object.id, entries);
                if same_measurements(&object.measurements, &measurements) {
                    return false;
                }
                object.measurements = measurements;
                true
            }
            None => {
                error!("Measurements for {} are not an object: {value}", object.id);
                false
            }
        },
        "metadata" => match value.as_object() {
            Some(entries) => {
                let metadata = decode_metadata(object.id, entries);
                replace_if_changed(&mut object.metadata, metadata)
            }
            None => {
                error!("Metadata for {} is not an object: {value}", object.id);
                false
            }
        },
        // Immutable; a kind change would be a delete plus a create.
        "objectType" => false,
        _ => {
            warn!("Unknown property change on {}: {key}", object.id);
            false
        }
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

fn decode_measurements(id: ObjectId, entries: &Map<String, Value>) -> BTreeMap<String, f64> {
    entries
        .iter()
        .filter_map(|(name, value)| match measurement_from_json(value) {
            Some(number) => Some((name.clone(), number)),
            None => {
                error!("Dropping non-numeric measurement {name} on {id}: {value}");
                None
            }
        })
        .collect()
}

fn decode_metadata(id: ObjectId, entries: &Map<String, Value>) -> BTreeMap<String, String> {
    entries
        .iter()
        .filter_map(|(key, value)| match value {
            Value::String(text) => Some((key.clone(), text.clone())),
            other => {
                error!("Dropping non-string metadata {key} on {id}: {other}");
                None
            }
        })
        .collect()
}
