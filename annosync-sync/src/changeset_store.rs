//! Append-only changeset log on top of an object store.
//!
//! Every changeset is an immutable blob named `events_<index>.jsonl` under a
//! shared prefix. Writers claim the next index with a create-if-absent write;
//! losing that race means someone else appended first, so the writer catches
//! up and tries the following index.
//!
//! Listeners attached at the store's cursor follow it: they receive every
//! changeset a sync discovers and every changeset written through this store,
//! minus their own events. A listener subscribed from an older position is
//! caught up by syncs until it reaches the store's cursor.
//!
//! Locks:
//! - `last_seen`: the cursor, shared by sync and write so they can't skip or
//!   double-claim an index. Listeners are notified while it is held.
//! - `current_sync`: the in-flight sync, if any
//! - `write_queue`: events waiting for the next writer task
//! - `writer`: held by a writer task from draining until its changeset is
//!   written, so changesets keep enqueue order
//! - `subscribers`: never held while calling a listener
//!
//! Only `last_seen` and `writer` are held across an await.

use crate::cloud::{BlobLocation, CreateOutcome, ObjectStore};
use crate::config::ChangesetStoreConfig;
use crate::error::{SyncError, SyncResult};
use annosync_types::{Event, changeset_name, decode_changeset, encode_changeset, parse_changeset_name};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Receives changes discovered or produced by a [`ChangesetStore`].
///
/// Called synchronously on whichever task ran the sync or write.
pub trait StoreListener: Send + Sync {
    /// Events from changesets this listener has not seen, in index order.
    fn on_new_events(&self, events: &[Event]);

    /// This listener's position advanced to `changeset_id`.
    fn on_new_changeset_id(&self, changeset_id: u64) {
        let _ = changeset_id;
    }
}

/// A registered listener and where it stands in the log.
struct Subscriber {
    listener: Arc<dyn StoreListener>,
    /// Last changeset delivered, when it differs from the store's cursor.
    cursor: Option<u64>,
}

/// A queued event and the listener whose change produced it.
struct QueuedEvent {
    event: Event,
    origin: Option<Arc<dyn StoreListener>>,
}

/// What one listener is told after a sync or write.
struct Delivery {
    listener: Arc<dyn StoreListener>,
    events: Vec<Event>,
    changeset_id: Option<u64>,
}

impl Delivery {
    fn send(self) {
        if !self.events.is_empty() {
            self.listener.on_new_events(&self.events);
        }
        if let Some(changeset_id) = self.changeset_id {
            self.listener.on_new_changeset_id(changeset_id);
        }
    }
}

type SharedSync = Shared<BoxFuture<'static, Result<(), Arc<SyncError>>>>;

const INITIAL_CONFLICT_BACKOFF: Duration = Duration::from_millis(50);
const MAX_CONFLICT_BACKOFF: Duration = Duration::from_secs(2);

/// A shared, append-only log of changesets.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ChangesetStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    object_store: Arc<dyn ObjectStore>,
    root: BlobLocation,
    runtime: Handle,
    last_seen: tokio::sync::Mutex<u64>,
    writer: tokio::sync::Mutex<()>,
    current_sync: Mutex<Option<SharedSync>>,
    write_queue: Mutex<Vec<QueuedEvent>>,
    subscribers: RwLock<Vec<Subscriber>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ChangesetStore {
    /// Opens a store with nothing seen yet, on the current tokio runtime.
    pub fn new(object_store: Arc<dyn ObjectStore>, root: &BlobLocation) -> SyncResult<Self> {
        Self::with_cursor(object_store, root, 0)
    }

    /// Opens a store that resumes after changeset `last_seen`.
    pub fn with_cursor(
        object_store: Arc<dyn ObjectStore>,
        root: &BlobLocation,
        last_seen: u64,
    ) -> SyncResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| SyncError::Runtime(format!("no tokio runtime: {e}")))?;
        Ok(Self::with_runtime(object_store, root, last_seen, runtime))
    }

    /// Opens a store from configuration.
    pub fn from_config(
        object_store: Arc<dyn ObjectStore>,
        config: &ChangesetStoreConfig,
    ) -> SyncResult<Self> {
        let root = BlobLocation::parse(&config.root)?;
        Self::with_cursor(object_store, &root, config.initial_cursor)
    }

    /// Opens a store whose background work runs on `runtime`.
    pub fn with_runtime(
        object_store: Arc<dyn ObjectStore>,
        root: &BlobLocation,
        last_seen: u64,
        runtime: Handle,
    ) -> Self {
        let root = root.as_prefix();
        info!(
            "Opened changeset store at {} ({}), cursor {}",
            root,
            object_store.provider_name(),
            last_seen
        );

        Self {
            inner: Arc::new(StoreInner {
                object_store,
                root,
                runtime,
                last_seen: tokio::sync::Mutex::new(last_seen),
                writer: tokio::sync::Mutex::new(()),
                current_sync: Mutex::new(None),
                write_queue: Mutex::new(Vec::new()),
                subscribers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// The `gs://bucket/prefix/` this store reads and writes under.
    pub fn changeset_root(&self) -> &BlobLocation {
        &self.inner.root
    }

    /// Highest changeset index observed so far.
    pub async fn last_seen_index(&self) -> u64 {
        *self.inner.last_seen.lock().await
    }

    /// Registers a listener at the store's current cursor.
    pub fn add_listener(&self, listener: Arc<dyn StoreListener>) {
        self.inner.register(listener, None);
    }

    /// Registers a listener that has seen changesets up to `from`, and syncs
    /// until it has caught up with the store.
    ///
    /// A listener already registered keeps its position.
    pub fn subscribe(
        &self,
        listener: Arc<dyn StoreListener>,
        from: u64,
    ) -> JoinHandle<SyncResult<()>> {
        self.inner.register(Arc::clone(&listener), Some(from));

        let store = self.clone();
        self.inner.runtime.spawn(async move {
            // A sync already running may have missed the new listener.
            loop {
                if let Err(e) = store.sync(true).await {
                    error!("Failed to catch up listener from changeset {from}: {e}");
                    return Err(e);
                }
                if !store.inner.is_behind(&listener).await {
                    return Ok(());
                }
            }
        })
    }

    pub fn remove_listener(&self, listener: &Arc<dyn StoreListener>) {
        self.inner
            .subscribers_mut()
            .retain(|s| !same_listener(&s.listener, listener));
    }

    /// Fetches changesets newer than the cursor and hands their events to
    /// listeners.
    ///
    /// Joins the in-flight sync if there is one. Non-blocking callers return
    /// as soon as the sync is running.
    pub async fn sync(&self, blocking: bool) -> SyncResult<()> {
        let in_flight = self.join_or_start_sync();
        if !blocking {
            return Ok(());
        }
        in_flight.await.map_err(SyncError::SyncFailed)
    }

    /// Starts a sync in the background, or does nothing if one is running.
    pub fn request_sync(&self) {
        self.join_or_start_sync();
    }

    fn join_or_start_sync(&self) -> SharedSync {
        let mut slot = lock(&self.inner.current_sync);
        if let Some(in_flight) = slot.as_ref() {
            debug!("Sync already in progress, joining it");
            return in_flight.clone();
        }

        info!("Launching new sync of {}", self.inner.root);
        let inner = Arc::clone(&self.inner);
        let sync = async move {
            let result = inner.run_sync().await.map_err(Arc::new);
            if let Err(e) = &result {
                error!("Sync of {} failed: {e}", inner.root);
            }
            *lock(&inner.current_sync) = None;
            result
        }
        .boxed()
        .shared();

        *slot = Some(sync.clone());
        // Keep it running even if every caller walks away.
        self.inner.runtime.spawn(sync.clone());
        sync
    }

    /// Queues events for writing and schedules a writer task.
    ///
    /// Events queued before a writer starts draining are written together in
    /// one changeset. The returned handle resolves to the index written, or
    /// `None` if another writer already took the queued events. Once written,
    /// the events are delivered to every listener following the store.
    pub fn store_events(&self, events: Vec<Event>) -> Option<JoinHandle<SyncResult<Option<u64>>>> {
        self.enqueue(events, None)
    }

    /// Like [`store_events`](Self::store_events), for events produced by
    /// `origin`, which is not handed its own events back.
    pub fn store_events_from(
        &self,
        events: Vec<Event>,
        origin: Arc<dyn StoreListener>,
    ) -> Option<JoinHandle<SyncResult<Option<u64>>>> {
        self.enqueue(events, Some(origin))
    }

    fn enqueue(
        &self,
        events: Vec<Event>,
        origin: Option<Arc<dyn StoreListener>>,
    ) -> Option<JoinHandle<SyncResult<Option<u64>>>> {
        if events.is_empty() {
            return None;
        }

        {
            let mut queue = lock(&self.inner.write_queue);
            info!("Enqueueing {} change events for storage", events.len());
            queue.extend(events.into_iter().map(|event| QueuedEvent {
                event,
                origin: origin.clone(),
            }));
        }

        let store = self.clone();
        Some(self.inner.runtime.spawn(async move {
            let result = store.write_pending().await;
            if let Err(e) = &result {
                error!("Failed to write changeset to {}: {e}", store.inner.root);
            }
            result
        }))
    }

    async fn write_pending(&self) -> SyncResult<Option<u64>> {
        let _writing = self.inner.writer.lock().await;
        let queued = std::mem::take(&mut *lock(&self.inner.write_queue));
        if queued.is_empty() {
            debug!("No events to write, another writer took them");
            return Ok(None);
        }

        let events: Vec<Event> = queued.iter().map(|q| q.event.clone()).collect();
        let content = encode_changeset(&events)?;
        let mut backoff = INITIAL_CONFLICT_BACKOFF;
        loop {
            let attempted = self.last_seen_index().await;
            if let Some(index) = self.attempt_write(&content, &queued).await? {
                info!("Wrote {} events as changeset {}", events.len(), index);
                return Ok(Some(index));
            }

            debug!("Changeset {} was claimed by another writer, syncing", attempted + 1);
            self.sync(true).await?;

            if self.last_seen_index().await == attempted {
                // The conflicting changeset is not visible to listings yet.
                warn!("Sync did not advance past {}, retrying in {:?}", attempted, backoff);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_CONFLICT_BACKOFF);
            } else {
                backoff = INITIAL_CONFLICT_BACKOFF;
            }
        }
    }

    /// Tries to claim the next index. `None` means someone else holds it.
    async fn attempt_write(&self, content: &[u8], queued: &[QueuedEvent]) -> SyncResult<Option<u64>> {
        let mut last_seen = self.inner.last_seen.lock().await;
        let candidate = *last_seen + 1;
        let blob = self.inner.changeset_location(candidate);

        match self
            .inner
            .object_store
            .create_if_absent(&blob, content)
            .await?
        {
            CreateOutcome::Created => {
                *last_seen = candidate;
                for delivery in self.inner.written_deliveries(candidate, queued) {
                    delivery.send();
                }
                Ok(Some(candidate))
            }
            CreateOutcome::AlreadyExists => Ok(None),
        }
    }
}

impl StoreInner {
    fn changeset_location(&self, index: u64) -> BlobLocation {
        self.root.child(&changeset_name(index))
    }

    /// Lists changesets under the root, keyed by index.
    async fn list_changesets(&self) -> SyncResult<BTreeMap<u64, BlobLocation>> {
        let blobs = self
            .object_store
            .list(&self.root.bucket, &self.root.name)
            .await?;

        Ok(blobs
            .into_iter()
            .filter_map(|blob| {
                let index = blob
                    .location
                    .name
                    .strip_prefix(&self.root.name)
                    .and_then(parse_changeset_name)?;
                Some((index, blob.location))
            })
            .collect())
    }

    async fn run_sync(&self) -> SyncResult<()> {
        let floor = {
            let cursor = *self.last_seen.lock().await;
            self.subscribers()
                .iter()
                .filter_map(|s| s.cursor)
                .fold(cursor, u64::min)
        };
        let mut pending = self.list_changesets().await?;
        pending.retain(|index, _| *index > floor);

        info!("Sync of {} found {} new changesets", self.root, pending.len());

        let mut fetched = BTreeMap::new();
        for (index, blob) in pending {
            let content = self.object_store.read_all(&blob).await?;
            fetched.insert(index, decode_changeset(&content));
        }

        let mut last_seen = self.last_seen.lock().await;
        let newest = fetched
            .keys()
            .next_back()
            .map_or(*last_seen, |index| (*index).max(*last_seen));

        let deliveries = self.synced_deliveries(floor, *last_seen, newest, &fetched);
        *last_seen = newest;
        for delivery in deliveries {
            delivery.send();
        }

        info!("Sync complete, cursor {}", *last_seen);
        Ok(())
    }

    /// Works out what each listener is missing from `fetched`, and moves
    /// their positions up to `newest`.
    fn synced_deliveries(
        &self,
        floor: u64,
        cursor: u64,
        newest: u64,
        fetched: &BTreeMap<u64, Vec<Event>>,
    ) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for subscriber in self.subscribers_mut().iter_mut() {
            // Listeners following the store have had our own writes already.
            let position = subscriber.cursor.unwrap_or(cursor);
            if position < floor {
                debug!("Listener at changeset {} subscribed mid-sync, catching up later", position);
                continue;
            }

            let events: Vec<Event> = fetched
                .range(position + 1..)
                .flat_map(|(_, changeset)| changeset.iter().cloned())
                .collect();
            deliveries.push(Delivery {
                listener: Arc::clone(&subscriber.listener),
                events,
                changeset_id: (newest > position).then_some(newest),
            });
            subscriber.cursor = (position > newest).then_some(position);
        }
        deliveries
    }

    /// Hands a freshly written changeset to the listeners following the store.
    fn written_deliveries(&self, index: u64, queued: &[QueuedEvent]) -> Vec<Delivery> {
        let previous = index - 1;
        let mut deliveries = Vec::new();
        for subscriber in self.subscribers_mut().iter_mut() {
            if subscriber.cursor.is_some_and(|c| c != previous) {
                continue;
            }
            subscriber.cursor = None;

            let events = queued
                .iter()
                .filter(|q| {
                    !q.origin
                        .as_ref()
                        .is_some_and(|origin| same_listener(origin, &subscriber.listener))
                })
                .map(|q| q.event.clone())
                .collect();
            deliveries.push(Delivery {
                listener: Arc::clone(&subscriber.listener),
                events,
                changeset_id: Some(index),
            });
        }
        deliveries
    }

    fn register(&self, listener: Arc<dyn StoreListener>, cursor: Option<u64>) {
        let mut subscribers = self.subscribers_mut();
        if !subscribers.iter().any(|s| same_listener(&s.listener, &listener)) {
            subscribers.push(Subscriber { listener, cursor });
        }
    }

    async fn is_behind(&self, listener: &Arc<dyn StoreListener>) -> bool {
        let cursor = *self.last_seen.lock().await;
        self.subscribers()
            .iter()
            .find(|s| same_listener(&s.listener, listener))
            .and_then(|s| s.cursor)
            .is_some_and(|position| position < cursor)
    }

    fn subscribers(&self) -> RwLockReadGuard<'_, Vec<Subscriber>> {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn subscribers_mut(&self) -> RwLockWriteGuard<'_, Vec<Subscriber>> {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn same_listener(a: &Arc<dyn StoreListener>, b: &Arc<dyn StoreListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
