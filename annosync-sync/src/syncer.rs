//! Annotation synchronizer - bridges an object hierarchy and a changeset store.
//!
//! Local hierarchy notifications become change events written to the store.
//! Events the store discovers are replayed onto the hierarchy with local
//! tracking paused, then the replayed objects are re-snapshotted so they are
//! not echoed back as local edits.
//!
//! Lock order is hierarchy, then tracker. Hierarchy notifications arrive with
//! the hierarchy already locked by the caller, so the listener side never
//! locks it again.

use crate::applicator::EventApplicator;
use crate::changeset_store::{ChangesetStore, StoreListener};
use crate::cloud::BlobLocation;
use crate::config::SyncerConfig;
use crate::error::SyncResult;
use crate::registry::StoreRegistry;
use crate::session::SessionProperties;
use crate::tracker::ChangeTracker;
use annosync_model::{
    ChangeOrigin, HierarchyEvent, HierarchyEventKind, HierarchyListener, ObjectHierarchy,
};
use annosync_types::{Event, EventType, ObjectId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, error, info};

/// What the syncer is currently connected to.
struct Attachment {
    hierarchy: Arc<Mutex<ObjectHierarchy>>,
    session: Arc<dyn SessionProperties>,
    store: Option<ChangesetStore>,
}

/// Keeps one hierarchy in sync with a remote changeset log.
pub struct AnnotationSyncer {
    me: Weak<AnnotationSyncer>,
    config: SyncerConfig,
    tracker: Mutex<ChangeTracker>,
    applicator: EventApplicator,
    paused: AtomicBool,
    attachment: Mutex<Option<Attachment>>,
    tracked_changes: Mutex<Vec<Event>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl AnnotationSyncer {
    pub fn new(config: SyncerConfig) -> Arc<Self> {
        let tracker = ChangeTracker::with_diffable_kinds(config.diffable_kinds.iter().copied());
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            tracker: Mutex::new(tracker),
            applicator: EventApplicator::new(),
            paused: AtomicBool::new(false),
            attachment: Mutex::new(None),
            tracked_changes: Mutex::new(Vec::new()),
        })
    }

    /// Starts tracking `hierarchy` locally, without a remote store.
    pub fn attach(
        &self,
        hierarchy: Arc<Mutex<ObjectHierarchy>>,
        session: Arc<dyn SessionProperties>,
    ) -> SyncResult<()> {
        self.connect(
            Attachment {
                hierarchy,
                session,
                store: None,
            },
            0,
        )
    }

    /// Starts tracking `hierarchy` and syncing it with the changesets under
    /// `changeset_root`, resuming from the session's saved cursor.
    ///
    /// If the registry already has the store open, changesets between the
    /// session's cursor and the store's are replayed onto `hierarchy` too.
    pub fn attach_remote(
        &self,
        hierarchy: Arc<Mutex<ObjectHierarchy>>,
        session: Arc<dyn SessionProperties>,
        registry: &StoreRegistry,
        changeset_root: &BlobLocation,
    ) -> SyncResult<ChangesetStore> {
        let cursor = session
            .get_cursor(&self.config.cursor_property)
            .unwrap_or(0);
        info!(
            "Connecting to remote changeset store at {} from position {}",
            changeset_root, cursor
        );

        let store = registry.open(changeset_root, cursor);
        self.connect(
            Attachment {
                hierarchy,
                session,
                store: Some(store.clone()),
            },
            cursor,
        )?;
        Ok(store)
    }

    fn connect(&self, attachment: Attachment, cursor: u64) -> SyncResult<()> {
        self.detach();

        let hierarchy = Arc::clone(&attachment.hierarchy);
        let store = attachment.store.clone();
        {
            let mut hierarchy = lock(&hierarchy);
            lock(&self.tracker).retrack(&hierarchy)?;
            // Listeners below look the attachment up as soon as they fire.
            *lock(&self.attachment) = Some(attachment);
            if let Some(me) = self.me.upgrade() {
                hierarchy.add_listener(me);
            }
        }

        if let Some(store) = store
            && let Some(me) = self.me.upgrade()
        {
            // Detached; the store logs catch-up failures.
            let _ = store.subscribe(me, cursor);
        }
        Ok(())
    }

    /// Stops listening to the hierarchy and store and forgets tracked state.
    pub fn detach(&self) {
        let Some(previous) = lock(&self.attachment).take() else {
            return;
        };

        if let Some(me) = self.me.upgrade() {
            let as_hierarchy_listener: Arc<dyn HierarchyListener> = me.clone();
            lock(&previous.hierarchy).remove_listener(&as_hierarchy_listener);

            if let Some(store) = &previous.store {
                info!("Disconnecting from remote store at {}", store.changeset_root());
                let as_store_listener: Arc<dyn StoreListener> = me;
                store.remove_listener(&as_store_listener);
            }
        }

        lock(&self.tracker).clear();
    }

    /// The store currently synced with, if any.
    pub fn store(&self) -> Option<ChangesetStore> {
        lock(&self.attachment)
            .as_ref()
            .and_then(|attachment| attachment.store.clone())
    }

    /// Every event produced from local changes so far.
    pub fn tracked_changes(&self) -> Vec<Event> {
        lock(&self.tracked_changes).clone()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// While paused, local hierarchy changes are not tracked.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    fn track(&self, hierarchy: &ObjectHierarchy, event: &HierarchyEvent) -> SyncResult<Vec<Event>> {
        let mut tracker = lock(&self.tracker);
        let events = match event.kind {
            HierarchyEventKind::Added
            | HierarchyEventKind::ChangeMeasurements
            | HierarchyEventKind::ChangeClassification
            | HierarchyEventKind::ChangeOther => tracker.track_changes(&event.changed)?,
            HierarchyEventKind::Removed => tracker.track_deletions(&event.changed),
            HierarchyEventKind::OtherStructureChange => tracker.track_bulk(hierarchy.objects())?,
        };
        Ok(events)
    }
}

impl HierarchyListener for AnnotationSyncer {
    fn hierarchy_changed(&self, hierarchy: &ObjectHierarchy, event: &HierarchyEvent) {
        if self.is_paused() || event.origin == ChangeOrigin::Replay {
            return;
        }
        // Ignore intermediate states of gestures still in progress.
        if event.is_changing {
            return;
        }

        let Some(store) = lock(&self.attachment).as_ref().map(|a| a.store.clone()) else {
            error!("Received hierarchy change but no hierarchy is being tracked");
            return;
        };

        info!("Hierarchy change event: {:?}", event.kind);
        let events = match self.track(hierarchy, event) {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to track hierarchy change: {e}");
                return;
            }
        };

        info!("Detected {} changed hierarchy objects", events.len());
        let mut counts: BTreeMap<EventType, usize> = BTreeMap::new();
        for change in &events {
            *counts.entry(change.event_type()).or_default() += 1;
        }
        for (event_type, count) in counts {
            debug!("Changes of type {}: {}", event_type, count);
        }

        lock(&self.tracked_changes).extend(events.iter().cloned());
        if let Some(store) = store {
            match self.me.upgrade() {
                Some(me) => store.store_events_from(events, me),
                None => store.store_events(events),
            };
        }
    }
}

impl StoreListener for AnnotationSyncer {
    fn on_new_events(&self, events: &[Event]) {
        let Some(hierarchy) = lock(&self.attachment)
            .as_ref()
            .map(|a| Arc::clone(&a.hierarchy))
        else {
            return;
        };

        info!("Received {} new events from remote store", events.len());
        let mut hierarchy = lock(&hierarchy);

        let was_paused = self.paused.swap(true, Ordering::SeqCst);
        self.applicator.apply_events(events, &mut hierarchy);
        self.paused.store(was_paused, Ordering::SeqCst);

        let touched: BTreeSet<ObjectId> = events.iter().map(Event::id).collect();
        if let Err(e) = lock(&self.tracker).retrack_objects(&touched, &hierarchy) {
            error!("Failed to re-snapshot replayed objects: {e}");
        }
    }

    fn on_new_changeset_id(&self, changeset_id: u64) {
        info!("Annotation syncer now at changeset {}", changeset_id);
        if let Some(attachment) = lock(&self.attachment).as_ref() {
            attachment
                .session
                .set_cursor(&self.config.cursor_property, changeset_id);
        }
    }
}
