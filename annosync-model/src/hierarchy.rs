//! The object hierarchy and its change notifications.
//!
//! Mutations either fire a notification immediately or are silent, leaving the
//! caller to fire one aggregated notification later. Every notification records
//! where the change came from so that listeners can tell local edits apart from
//! replayed remote changes.

use crate::{ObjectKind, PathObject};
use annosync_types::ObjectId;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Coarse category of a hierarchy change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HierarchyEventKind {
    Added,
    Removed,
    ChangeMeasurements,
    ChangeClassification,
    ChangeOther,
    /// Anything could have changed; listeners should rescan the whole hierarchy.
    OtherStructureChange,
}

/// Where a change originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOrigin {
    /// A user or tool edited the hierarchy in this process.
    Local,
    /// Changes received from elsewhere were replayed into the hierarchy.
    Replay,
}

/// A change notification.
#[derive(Debug, Clone)]
pub struct HierarchyEvent {
    pub kind: HierarchyEventKind,
    /// Objects affected, as they were when the notification fired.
    /// Empty for [`HierarchyEventKind::OtherStructureChange`].
    pub changed: Vec<PathObject>,
    /// True while a gesture (e.g. a drag) is still in progress.
    pub is_changing: bool,
    pub origin: ChangeOrigin,
}

impl HierarchyEvent {
    #[must_use]
    pub fn local(kind: HierarchyEventKind, changed: Vec<PathObject>) -> Self {
        Self {
            kind,
            changed,
            is_changing: false,
            origin: ChangeOrigin::Local,
        }
    }

    #[must_use]
    pub fn structure_changed(origin: ChangeOrigin) -> Self {
        Self {
            kind: HierarchyEventKind::OtherStructureChange,
            changed: Vec::new(),
            is_changing: false,
            origin,
        }
    }

    #[must_use]
    pub fn changing(mut self, is_changing: bool) -> Self {
        self.is_changing = is_changing;
        self
    }
}

/// Receives hierarchy change notifications.
///
/// Called synchronously from the mutating call, with the hierarchy already updated.
pub trait HierarchyListener: Send + Sync {
    fn hierarchy_changed(&self, hierarchy: &ObjectHierarchy, event: &HierarchyEvent);
}

/// A tree of path objects under a single root.
pub struct ObjectHierarchy {
    root: PathObject,
    objects: BTreeMap<ObjectId, PathObject>,
    listeners: Vec<Arc<dyn HierarchyListener>>,
}

impl Default for ObjectHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectHierarchy {
    /// Creates an empty hierarchy with a fresh root.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: PathObject::root(),
            objects: BTreeMap::new(),
            listeners: Vec::new(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &PathObject {
        &self.root
    }

    /// All non-root objects keyed by id.
    #[must_use]
    pub fn objects(&self) -> &BTreeMap<ObjectId, PathObject> {
        &self.objects
    }

    /// All objects, optionally including the root first.
    pub fn all_objects(&self, include_root: bool) -> impl Iterator<Item = &PathObject> {
        include_root
            .then_some(&self.root)
            .into_iter()
            .chain(self.objects.values())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Looks up an object by id, including the root.
    #[must_use]
    pub fn get(&self, id: &ObjectId) -> Option<&PathObject> {
        if *id == self.root.id {
            return Some(&self.root);
        }
        self.objects.get(id)
    }

    /// Mutable lookup. Does not notify; callers fire a notification when done.
    pub fn get_mut(&mut self, id: &ObjectId) -> Option<&mut PathObject> {
        if *id == self.root.id {
            return Some(&mut self.root);
        }
        self.objects.get_mut(id)
    }

    #[must_use]
    pub fn contains(&self, id: &ObjectId) -> bool {
        *id == self.root.id || self.objects.contains_key(id)
    }

    /// Adds an object. Returns false if the id is already present.
    pub fn add_object(&mut self, object: PathObject, fire_update: bool) -> bool {
        if object.kind == ObjectKind::Root || self.contains(&object.id) {
            warn!("Refusing to add object {} ({:?})", object.id, object.kind);
            return false;
        }

        let added = fire_update.then(|| object.clone());
        self.objects.insert(object.id, object);

        if let Some(added) = added {
            self.notify(&HierarchyEvent::local(HierarchyEventKind::Added, vec![added]));
        }
        true
    }

    /// Adds several objects, firing a single notification if requested.
    pub fn add_objects(&mut self, objects: Vec<PathObject>, fire_update: bool) -> usize {
        let mut added = Vec::new();
        for object in objects {
            let copy = object.clone();
            if self.add_object(object, false) {
                added.push(copy);
            }
        }

        let count = added.len();
        if fire_update && !added.is_empty() {
            self.notify(&HierarchyEvent::local(HierarchyEventKind::Added, added));
        }
        count
    }

    /// Removes an object by id.
    pub fn remove_object(&mut self, id: &ObjectId, fire_update: bool) -> Option<PathObject> {
        let removed = self.objects.remove(id)?;
        if fire_update {
            self.notify(&HierarchyEvent::local(
                HierarchyEventKind::Removed,
                vec![removed.clone()],
            ));
        }
        Some(removed)
    }

    /// Applies `edit` to an object and fires a local change notification.
    pub fn update_object<F>(&mut self, id: &ObjectId, kind: HierarchyEventKind, edit: F) -> bool
    where
        F: FnOnce(&mut PathObject),
    {
        let Some(object) = self.get_mut(id) else {
            return false;
        };
        edit(object);
        let snapshot = object.clone();
        self.notify(&HierarchyEvent::local(kind, vec![snapshot]));
        true
    }

    /// Fires a change notification for objects already mutated in place.
    pub fn fire_objects_changed(&self, kind: HierarchyEventKind, ids: &[ObjectId], is_changing: bool) {
        let changed = ids.iter().filter_map(|id| self.get(id).cloned()).collect();
        self.notify(&HierarchyEvent::local(kind, changed).changing(is_changing));
    }

    /// Fires a single whole-hierarchy change notification.
    pub fn fire_hierarchy_changed(&self, origin: ChangeOrigin) {
        self.notify(&HierarchyEvent::structure_changed(origin));
    }

    /// Removes every object (keeping the root) and fires a structure change.
    pub fn clear_all(&mut self) {
        self.objects.clear();
        self.notify(&HierarchyEvent::structure_changed(ChangeOrigin::Local));
    }

    pub fn add_listener(&mut self, listener: Arc<dyn HierarchyListener>) {
        if !self.listeners.iter().any(|l| same_listener(l, &listener)) {
            self.listeners.push(listener);
        }
    }

    pub fn remove_listener(&mut self, listener: &Arc<dyn HierarchyListener>) {
        self.listeners.retain(|l| !same_listener(l, listener));
    }

    /// Delivers `event` to every listener.
    pub fn notify(&self, event: &HierarchyEvent) {
        debug!(
            "Hierarchy event {:?} ({} objects, origin {:?})",
            event.kind,
            event.changed.len(),
            event.origin
        );
        for listener in &self.listeners {
            listener.hierarchy_changed(self, event);
        }
    }
}

fn same_listener(a: &Arc<dyn HierarchyListener>, b: &Arc<dyn HierarchyListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
