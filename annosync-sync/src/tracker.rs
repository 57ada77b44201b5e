//! Change tracker - turns hierarchy snapshots into change events.
//!
//! The tracker remembers the last serialized state of every object it has
//! seen. Comparing that against the live hierarchy yields create, edit and
//! delete events. Edits carry a shallow diff: each top-level key whose value
//! changed is sent whole.

use annosync_model::{ModelResult, ObjectHierarchy, ObjectKind, PathObject};
use annosync_types::{Event, ObjectId, ObjectState};
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Computes the top-level difference between two states.
///
/// Contains every key of `new` whose value differs from `old`, plus every key
/// of `old` missing from `new` (as `null`). Empty exactly when the states are
/// equal.
pub fn diff_top_level(old: &ObjectState, new: &ObjectState) -> ObjectState {
    let mut diff = ObjectState::new();
    for (key, value) in new {
        if old.get(key) != Some(value) {
            diff.insert(key.clone(), value.clone());
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            diff.insert(key.clone(), Value::Null);
        }
    }
    diff
}

/// Tracks the last known serialized state of each object.
#[derive(Debug, Clone)]
pub struct ChangeTracker {
    tracked: BTreeMap<ObjectId, ObjectState>,
    diffable_kinds: HashSet<ObjectKind>,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeTracker {
    /// Creates a tracker that diffs annotations only.
    pub fn new() -> Self {
        Self::with_diffable_kinds([ObjectKind::Annotation])
    }

    /// Creates a tracker that diffs the given kinds. Objects of other kinds
    /// are tracked for existence only.
    pub fn with_diffable_kinds(kinds: impl IntoIterator<Item = ObjectKind>) -> Self {
        Self {
            tracked: BTreeMap::new(),
            diffable_kinds: kinds
                .into_iter()
                .filter(|kind| *kind != ObjectKind::Root)
                .collect(),
        }
    }

    pub fn is_diffable(&self, kind: ObjectKind) -> bool {
        self.diffable_kinds.contains(&kind)
    }

    /// The tracked snapshot for an object, if any.
    pub fn tracked_state(&self, id: &ObjectId) -> Option<&ObjectState> {
        self.tracked.get(id)
    }

    pub fn tracked(&self) -> &BTreeMap<ObjectId, ObjectState> {
        &self.tracked
    }

    pub fn is_tracking(&self, id: &ObjectId) -> bool {
        self.tracked.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracked.clear();
    }

    /// The snapshot stored for `object`: its full state if diffable, else an
    /// empty placeholder.
    fn snapshot(&self, object: &PathObject) -> ModelResult<ObjectState> {
        if self.is_diffable(object.kind) {
            object.to_state()
        } else {
            Ok(ObjectState::new())
        }
    }

    /// Replaces all tracked state with a snapshot of `hierarchy`. Emits nothing.
    pub fn retrack(&mut self, hierarchy: &ObjectHierarchy) -> ModelResult<()> {
        let mut tracked = BTreeMap::new();
        for (id, object) in hierarchy.objects() {
            tracked.insert(*id, self.snapshot(object)?);
        }
        self.tracked = tracked;
        info!("Tracking {} objects", self.tracked.len());
        Ok(())
    }

    /// Records new or changed objects.
    ///
    /// Untracked objects produce a create event with their full state. Tracked
    /// ones produce an edit, even when nothing changed.
    pub fn track_changes<'a>(
        &mut self,
        objects: impl IntoIterator<Item = &'a PathObject>,
    ) -> ModelResult<Vec<Event>> {
        let now = Utc::now();
        let mut events = Vec::new();

        for object in objects {
            if object.is_root() {
                continue;
            }
            let state = object.to_state()?;
            let event = match self.tracked.get(&object.id) {
                Some(old) => Event::edit_at(object.id, now, diff_top_level(old, &state)),
                None => Event::create_at(object.id, now, state.clone()),
            };
            self.tracked.insert(object.id, state);
            events.push(event);
        }

        debug!("Tracked {} changed objects", events.len());
        Ok(events)
    }

    /// Records removed objects. Every object yields a delete event, tracked or not.
    pub fn track_deletions<'a>(
        &mut self,
        objects: impl IntoIterator<Item = &'a PathObject>,
    ) -> Vec<Event> {
        let now = Utc::now();
        objects
            .into_iter()
            .map(|object| {
                self.tracked.remove(&object.id);
                Event::delete_at(object.id, now)
            })
            .collect()
    }

    /// Reconciles tracked state against a full set of objects.
    ///
    /// Emits creates for new ids, deletes for vanished ids and edits for
    /// diffable objects whose state changed, all sharing one timestamp.
    /// Tracked state is only updated after every object has been compared.
    pub fn track_bulk(
        &mut self,
        objects: &BTreeMap<ObjectId, PathObject>,
    ) -> ModelResult<Vec<Event>> {
        let now = Utc::now();
        let mut events = Vec::new();
        let mut updates: Vec<(ObjectId, Option<ObjectState>)> = Vec::new();

        for (id, object) in objects {
            if object.is_root() || self.tracked.contains_key(id) {
                continue;
            }
            let state = object.to_state()?;
            events.push(Event::create_at(*id, now, state.clone()));
            updates.push((*id, Some(state)));
        }

        for (id, old) in &self.tracked {
            let Some(object) = objects.get(id) else {
                events.push(Event::delete_at(*id, now));
                updates.push((*id, None));
                continue;
            };
            if object.is_root() || !self.is_diffable(object.kind) {
                continue;
            }
            let state = object.to_state()?;
            if *old != state {
                events.push(Event::edit_at(*id, now, diff_top_level(old, &state)));
                updates.push((*id, Some(state)));
            }
        }

        for (id, state) in updates {
            match state {
                Some(state) => self.tracked.insert(id, state),
                None => self.tracked.remove(&id),
            };
        }

        debug!("Bulk tracking produced {} events", events.len());
        Ok(events)
    }

    /// Refreshes tracked state for specific ids from the live hierarchy.
    ///
    /// Used after replaying remote events so they are not re-emitted as local
    /// changes. Ids no longer in the hierarchy are forgotten.
    pub fn retrack_objects<'a>(
        &mut self,
        ids: impl IntoIterator<Item = &'a ObjectId>,
        hierarchy: &ObjectHierarchy,
    ) -> ModelResult<()> {
        for id in ids {
            match hierarchy.objects().get(id) {
                Some(object) => {
                    let state = self.snapshot(object)?;
                    self.tracked.insert(*id, state);
                }
                None => {
                    self.tracked.remove(id);
                }
            }
        }
        Ok(())
    }
}
