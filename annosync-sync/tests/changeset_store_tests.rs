mod common;

use annosync_sync::{
    BlobLocation, ChangesetStore, ChangesetStoreConfig, MemoryObjectStore, ObjectStore,
    StoreListener, SyncError,
};
use annosync_types::{Event, ObjectId, ObjectState, changeset_name, decode_changeset, encode_changeset};
use common::{init_tracing, wait_until};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Collector {
    events: Mutex<Vec<Event>>,
    changeset_ids: Mutex<Vec<u64>>,
}

impl StoreListener for Collector {
    fn on_new_events(&self, events: &[Event]) {
        self.events.lock().unwrap().extend_from_slice(events);
    }

    fn on_new_changeset_id(&self, changeset_id: u64) {
        self.changeset_ids.lock().unwrap().push(changeset_id);
    }
}

fn root() -> BlobLocation {
    BlobLocation::parse("gs://test-bucket/images/slide-1/changes").unwrap()
}

fn changeset(index: u64) -> BlobLocation {
    root().as_prefix().child(&changeset_name(index))
}

fn some_event() -> Event {
    Event::create(ObjectId::new(), ObjectState::new())
}

fn setup() -> (Arc<MemoryObjectStore>, ChangesetStore) {
    init_tracing();
    let objects = Arc::new(MemoryObjectStore::new());
    let store = ChangesetStore::new(objects.clone(), &root()).unwrap();
    (objects, store)
}

fn stored_events(objects: &MemoryObjectStore, index: u64) -> Vec<Event> {
    decode_changeset(&objects.get(&changeset(index)).expect("changeset missing"))
}

// ── Locations ───────────────────────────────────────────────────

#[test]
fn parse_gs_uri() {
    let location = BlobLocation::parse("gs://bucket/a/b").unwrap();
    assert_eq!(location.bucket, "bucket");
    assert_eq!(location.name, "a/b");
    assert_eq!(location.as_prefix().name, "a/b/");
    assert_eq!(location.as_prefix().as_prefix().name, "a/b/");
    assert_eq!(location.to_string(), "gs://bucket/a/b");
}

#[test]
fn parse_bucket_root() {
    let location = BlobLocation::parse("gs://bucket").unwrap();
    assert_eq!(location.name, "");
    assert_eq!(location.as_prefix().name, "");
}

#[test]
fn parse_rejects_other_schemes_and_missing_bucket() {
    assert!(matches!(
        BlobLocation::parse("s3://bucket/prefix"),
        Err(SyncError::InvalidLocation(_))
    ));
    assert!(matches!(
        BlobLocation::parse("gs:///prefix"),
        Err(SyncError::InvalidLocation(_))
    ));
}

#[tokio::test]
async fn store_root_is_normalised_to_a_prefix() {
    let (_, store) = setup();
    assert_eq!(
        store.changeset_root().gs_uri(),
        "gs://test-bucket/images/slide-1/changes/"
    );
}

#[test]
fn store_requires_a_runtime() {
    let objects = Arc::new(MemoryObjectStore::new());
    assert!(matches!(
        ChangesetStore::new(objects, &root()),
        Err(SyncError::Runtime(_))
    ));
}

#[tokio::test]
async fn store_from_config_starts_at_cursor() {
    let objects = Arc::new(MemoryObjectStore::new());
    let config = ChangesetStoreConfig::new("gs://test-bucket/images/slide-1/changes").with_cursor(7);
    let store = ChangesetStore::from_config(objects, &config).unwrap();
    assert_eq!(store.last_seen_index().await, 7);
}

// ── Writing ─────────────────────────────────────────────────────

#[tokio::test]
async fn events_queued_together_share_one_changeset() {
    let (objects, store) = setup();
    let first = some_event();
    let second = some_event();

    let a = store.store_events(vec![first.clone()]).unwrap();
    let b = store.store_events(vec![second.clone()]).unwrap();

    assert_eq!(a.await.unwrap().unwrap(), Some(1));
    assert_eq!(b.await.unwrap().unwrap(), None);

    assert_eq!(objects.locations(), vec![changeset(1)]);
    assert_eq!(stored_events(&objects, 1), vec![first, second]);
}

#[tokio::test]
async fn separate_writes_get_consecutive_indices() {
    let (objects, store) = setup();

    let a = store.store_events(vec![some_event()]).unwrap();
    assert_eq!(a.await.unwrap().unwrap(), Some(1));
    let b = store.store_events(vec![some_event()]).unwrap();
    assert_eq!(b.await.unwrap().unwrap(), Some(2));

    let names: Vec<_> = objects.locations().into_iter().map(|l| l.name).collect();
    assert_eq!(
        names,
        vec![
            "images/slide-1/changes/events_0000000001.jsonl",
            "images/slide-1/changes/events_0000000002.jsonl",
        ]
    );
    assert_eq!(store.last_seen_index().await, 2);
}

#[tokio::test]
async fn empty_batches_are_not_written() {
    let (objects, store) = setup();
    assert!(store.store_events(Vec::new()).is_none());
    assert_eq!(objects.create_calls(), 0);
}

#[tokio::test]
async fn conflicting_write_syncs_and_retries_at_next_index() {
    let (objects, store) = setup();
    let collector = Arc::new(Collector::default());
    store.add_listener(collector.clone());

    let theirs = some_event();
    objects.insert(changeset(1), encode_changeset(&[theirs.clone()]).unwrap());

    let ours = vec![some_event(), some_event()];
    let handle = store.store_events_from(ours.clone(), collector.clone()).unwrap();

    assert_eq!(handle.await.unwrap().unwrap(), Some(2));
    assert_eq!(stored_events(&objects, 2), ours);
    assert_eq!(*collector.events.lock().unwrap(), vec![theirs]);
    assert_eq!(*collector.changeset_ids.lock().unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn written_events_reach_other_listeners_but_not_their_origin() {
    let (_, store) = setup();
    let writer = Arc::new(Collector::default());
    let reader = Arc::new(Collector::default());
    store.add_listener(writer.clone());
    store.add_listener(reader.clone());

    let mine = some_event();
    let handle = store.store_events_from(vec![mine.clone()], writer.clone()).unwrap();
    assert_eq!(handle.await.unwrap().unwrap(), Some(1));

    assert!(writer.events.lock().unwrap().is_empty());
    assert_eq!(*writer.changeset_ids.lock().unwrap(), vec![1]);
    assert_eq!(*reader.events.lock().unwrap(), vec![mine]);
    assert_eq!(*reader.changeset_ids.lock().unwrap(), vec![1]);

    // Already delivered; a sync must not hand it out again.
    store.sync(true).await.unwrap();
    assert_eq!(reader.events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn mixed_origin_changeset_filters_per_listener() {
    let (_, store) = setup();
    let left = Arc::new(Collector::default());
    let right = Arc::new(Collector::default());
    store.add_listener(left.clone());
    store.add_listener(right.clone());

    let from_left = some_event();
    let from_right = some_event();
    let external = some_event();
    let a = store.store_events_from(vec![from_left.clone()], left.clone()).unwrap();
    let b = store.store_events_from(vec![from_right.clone()], right.clone()).unwrap();
    let c = store.store_events(vec![external.clone()]).unwrap();
    assert_eq!(a.await.unwrap().unwrap(), Some(1));
    assert_eq!(b.await.unwrap().unwrap(), None);
    assert_eq!(c.await.unwrap().unwrap(), None);

    assert_eq!(*left.events.lock().unwrap(), vec![from_right.clone(), external.clone()]);
    assert_eq!(*right.events.lock().unwrap(), vec![from_left, external]);
}

#[tokio::test]
async fn write_failure_is_reported() {
    let (objects, store) = setup();
    objects.set_offline(true);

    let handle = store.store_events(vec![some_event()]).unwrap();
    let result = handle.await.unwrap();

    assert!(matches!(result, Err(SyncError::Network(_))));
    assert!(objects.is_empty());
}

// ── Syncing ─────────────────────────────────────────────────────

#[tokio::test]
async fn sync_delivers_new_events_in_index_order() {
    let (objects, store) = setup();
    let collector = Arc::new(Collector::default());
    store.add_listener(collector.clone());

    let first = some_event();
    let second = some_event();
    let third = some_event();
    objects.insert(changeset(2), encode_changeset(&[second.clone(), third.clone()]).unwrap());
    objects.insert(changeset(1), encode_changeset(&[first.clone()]).unwrap());

    store.sync(true).await.unwrap();

    assert_eq!(*collector.events.lock().unwrap(), vec![first, second, third]);
    assert_eq!(*collector.changeset_ids.lock().unwrap(), vec![2]);
    assert_eq!(store.last_seen_index().await, 2);
}

#[tokio::test]
async fn sync_skips_changesets_at_or_below_cursor() {
    init_tracing();
    let objects = Arc::new(MemoryObjectStore::new());
    objects.insert(changeset(1), encode_changeset(&[some_event()]).unwrap());
    let newer = some_event();
    objects.insert(changeset(2), encode_changeset(&[newer.clone()]).unwrap());

    let store = ChangesetStore::with_cursor(objects.clone(), &root(), 1).unwrap();
    let collector = Arc::new(Collector::default());
    store.add_listener(collector.clone());

    store.sync(true).await.unwrap();

    assert_eq!(*collector.events.lock().unwrap(), vec![newer]);
    assert_eq!(objects.read_calls(), 1);
}

#[tokio::test]
async fn sync_with_nothing_new_notifies_nobody() {
    let (objects, store) = setup();
    let collector = Arc::new(Collector::default());
    store.add_listener(collector.clone());
    objects.insert(changeset(1), Vec::new());

    store.sync(true).await.unwrap();
    store.sync(true).await.unwrap();

    assert!(collector.events.lock().unwrap().is_empty());
    assert_eq!(*collector.changeset_ids.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn sync_ignores_unrelated_and_nested_blobs() {
    let (objects, store) = setup();
    let collector = Arc::new(Collector::default());
    store.add_listener(collector.clone());

    let payload = encode_changeset(&[some_event()]).unwrap();
    let prefix = root().as_prefix();
    objects.insert(prefix.child("notes.txt"), payload.clone());
    objects.insert(prefix.child("old/events_0000000005.jsonl"), payload.clone());
    objects.insert(prefix.child("events_latest.jsonl"), payload.clone());
    objects.insert(
        BlobLocation::new("other-bucket", changeset(3).name),
        payload,
    );

    store.sync(true).await.unwrap();

    assert!(collector.events.lock().unwrap().is_empty());
    assert_eq!(store.last_seen_index().await, 0);
}

#[tokio::test]
async fn malformed_lines_are_dropped() {
    let (objects, store) = setup();
    let collector = Arc::new(Collector::default());
    store.add_listener(collector.clone());

    let good = some_event();
    let mut content = b"{\"not\": \"an event\"}\n".to_vec();
    content.extend(encode_changeset(&[good.clone()]).unwrap());
    objects.insert(changeset(1), content);

    store.sync(true).await.unwrap();
    assert_eq!(*collector.events.lock().unwrap(), vec![good]);
}

#[tokio::test]
async fn sync_failure_propagates_and_leaves_cursor() {
    let (objects, store) = setup();
    objects.insert(changeset(1), encode_changeset(&[some_event()]).unwrap());
    objects.set_offline(true);

    let err = store.sync(true).await.unwrap_err();
    assert!(matches!(err, SyncError::SyncFailed(ref inner) if matches!(**inner, SyncError::Network(_))));
    assert_eq!(store.last_seen_index().await, 0);

    objects.set_offline(false);
    store.sync(true).await.unwrap();
    assert_eq!(store.last_seen_index().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_syncs_share_one_listing() {
    let (objects, store) = setup();
    objects.pause_listing();

    store.sync(false).await.unwrap();
    wait_until(|| objects.list_calls() == 1).await;

    let joiners: Vec<_> = (0..2)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.sync(true).await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(objects.list_calls(), 1);

    objects.resume_listing();
    for joiner in joiners {
        joiner.await.unwrap().unwrap();
    }
    assert_eq!(objects.list_calls(), 1);

    store.sync(true).await.unwrap();
    store.sync(true).await.unwrap();
    assert_eq!(objects.list_calls(), 3);
}

// ── Subscribing ─────────────────────────────────────────────────

#[tokio::test]
async fn subscriber_behind_the_store_is_caught_up() {
    let (objects, store) = setup();
    let follower = Arc::new(Collector::default());
    store.add_listener(follower.clone());

    let first = some_event();
    let second = some_event();
    store.store_events(vec![first.clone()]).unwrap().await.unwrap().unwrap();
    store.store_events(vec![second.clone()]).unwrap().await.unwrap().unwrap();
    assert_eq!(store.last_seen_index().await, 2);

    let late = Arc::new(Collector::default());
    store.subscribe(late.clone(), 0).await.unwrap().unwrap();

    assert_eq!(*late.events.lock().unwrap(), vec![first.clone(), second.clone()]);
    assert_eq!(*late.changeset_ids.lock().unwrap(), vec![2]);
    assert_eq!(*follower.events.lock().unwrap(), vec![first, second]);
    assert_eq!(store.last_seen_index().await, 2);

    // Caught up: later writes reach it directly.
    let third = some_event();
    store.store_events(vec![third.clone()]).unwrap().await.unwrap().unwrap();
    assert_eq!(late.events.lock().unwrap().last(), Some(&third));
    assert_eq!(objects.len(), 3);
}

#[tokio::test]
async fn subscriber_ahead_of_the_store_skips_what_it_has() {
    let (objects, store) = setup();
    let mut all = Vec::new();
    for index in 1..=3 {
        let event = some_event();
        objects.insert(changeset(index), encode_changeset(&[event.clone()]).unwrap());
        all.push(event);
    }

    let resumed = Arc::new(Collector::default());
    store.subscribe(resumed.clone(), 2).await.unwrap().unwrap();

    assert_eq!(*resumed.events.lock().unwrap(), vec![all[2].clone()]);
    assert_eq!(*resumed.changeset_ids.lock().unwrap(), vec![3]);
    assert_eq!(store.last_seen_index().await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscriber_added_during_a_sync_is_caught_up_afterwards() {
    init_tracing();
    let objects = Arc::new(MemoryObjectStore::new());
    let first = some_event();
    let second = some_event();
    objects.insert(changeset(1), encode_changeset(&[first.clone()]).unwrap());
    objects.insert(changeset(2), encode_changeset(&[second.clone()]).unwrap());

    let store = ChangesetStore::with_cursor(objects.clone(), &root(), 1).unwrap();
    let follower = Arc::new(Collector::default());
    store.add_listener(follower.clone());

    objects.pause_listing();
    store.sync(false).await.unwrap();
    wait_until(|| objects.list_calls() == 1).await;

    let late = Arc::new(Collector::default());
    let catching_up = store.subscribe(late.clone(), 0);
    objects.resume_listing();
    catching_up.await.unwrap().unwrap();

    assert_eq!(*late.events.lock().unwrap(), vec![first, second.clone()]);
    assert_eq!(*follower.events.lock().unwrap(), vec![second]);
    assert_eq!(objects.list_calls(), 2);
}

#[tokio::test]
async fn removed_listener_is_not_notified() {
    let (objects, store) = setup();
    let collector = Arc::new(Collector::default());
    let listener: Arc<dyn StoreListener> = collector.clone();
    store.add_listener(listener.clone());
    store.add_listener(listener.clone());
    store.remove_listener(&listener);

    objects.insert(changeset(1), encode_changeset(&[some_event()]).unwrap());
    store.sync(true).await.unwrap();

    assert!(collector.events.lock().unwrap().is_empty());
}

// ── Two writers ─────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_stores_never_share_an_index() {
    init_tracing();
    let objects = Arc::new(MemoryObjectStore::new());
    let shared: Arc<dyn ObjectStore> = objects.clone();
    let left = ChangesetStore::new(shared.clone(), &root()).unwrap();
    let right = ChangesetStore::new(shared, &root()).unwrap();

    let mut handles = Vec::new();
    for _ in 0..5 {
        handles.push(left.store_events(vec![some_event()]).unwrap());
        handles.push(right.store_events(vec![some_event()]).unwrap());
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let indices: Vec<u64> = objects
        .locations()
        .iter()
        .filter_map(|l| annosync_types::parse_changeset_name(l.name.rsplit('/').next()?))
        .collect();
    let expected: Vec<u64> = (1..=indices.len() as u64).collect();
    assert_eq!(indices, expected);

    let total: usize = (1..=indices.len() as u64)
        .map(|i| stored_events(&objects, i).len())
        .sum();
    assert_eq!(total, 10);
}
