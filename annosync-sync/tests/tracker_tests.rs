mod common;

use annosync_model::{Geometry, ObjectHierarchy, ObjectKind, PathObject};
use annosync_sync::{ChangeTracker, diff_top_level};
use annosync_types::{Event, EventType, ObjectState};
use common::{init_tracing, square, tumor_annotation};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{Value, json};
use std::collections::BTreeMap;

fn state(value: Value) -> ObjectState {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

fn types(events: &[Event]) -> Vec<EventType> {
    events.iter().map(Event::event_type).collect()
}

// ── diff_top_level ──────────────────────────────────────────────

#[test]
fn diff_of_equal_states_is_empty() {
    let a = state(json!({"geometry": {"type": "Point"}, "properties": {"name": "a"}}));
    assert!(diff_top_level(&a, &a.clone()).is_empty());
}

#[test]
fn diff_includes_whole_changed_value() {
    let old = state(json!({
        "geometry": {"type": "Point", "coordinates": [1.0, 2.0]},
        "properties": {"name": "a", "metadata": {"k1": "v1", "k2": "v2"}}
    }));
    let new = state(json!({
        "geometry": {"type": "Point", "coordinates": [1.0, 2.0]},
        "properties": {"name": "a", "metadata": {"k1": "v1", "k2": "changed"}}
    }));

    let diff = diff_top_level(&old, &new);
    assert_eq!(
        Value::Object(diff),
        json!({"properties": {"name": "a", "metadata": {"k1": "v1", "k2": "changed"}}})
    );
}

#[test]
fn diff_marks_removed_keys_null() {
    let old = state(json!({"geometry": {"type": "Point"}, "properties": {}}));
    let new = state(json!({"properties": {}}));

    let diff = diff_top_level(&old, &new);
    assert_eq!(Value::Object(diff), json!({"geometry": null}));
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (-5i64..5).prop_map(Value::from),
        "[a-c]{0,2}".prop_map(Value::from),
        prop::collection::btree_map("[x-z]", -3i64..3, 0..3)
            .prop_map(|m| json!(m)),
    ]
}

fn arb_state() -> impl Strategy<Value = ObjectState> {
    prop::collection::btree_map("[a-e]", arb_value(), 0..5)
        .prop_map(|m| m.into_iter().collect::<ObjectState>())
}

proptest! {
    #[test]
    fn diff_is_empty_iff_states_equal(a in arb_state(), b in arb_state()) {
        prop_assert_eq!(diff_top_level(&a, &b).is_empty(), a == b);
    }

    #[test]
    fn diff_keys_are_keys_that_differ(a in arb_state(), b in arb_state()) {
        for key in diff_top_level(&a, &b).keys() {
            prop_assert_ne!(a.get(key), b.get(key));
        }
    }
}

// ── retrack ─────────────────────────────────────────────────────

#[test]
fn retrack_snapshots_annotations_and_placeholders_detections() {
    init_tracing();
    let mut hierarchy = ObjectHierarchy::new();
    let annotation = tumor_annotation("a");
    let detection = PathObject::detection(square(5.0, 5.0));
    hierarchy.add_object(annotation.clone(), false);
    hierarchy.add_object(detection.clone(), false);

    let mut tracker = ChangeTracker::new();
    tracker.retrack(&hierarchy).unwrap();

    assert_eq!(tracker.len(), 2);
    assert_eq!(
        tracker.tracked_state(&annotation.id),
        Some(&annotation.to_state().unwrap())
    );
    assert_eq!(tracker.tracked_state(&detection.id), Some(&ObjectState::new()));
    assert!(!tracker.is_tracking(&hierarchy.root().id));
}

#[test]
fn retrack_replaces_previous_snapshot() {
    let mut tracker = ChangeTracker::new();
    let stale = tumor_annotation("stale");
    tracker.track_changes([&stale]).unwrap();

    tracker.retrack(&ObjectHierarchy::new()).unwrap();
    assert!(tracker.is_empty());
}

#[test]
fn diffable_kinds_are_configurable() {
    let mut hierarchy = ObjectHierarchy::new();
    let detection = PathObject::detection(square(0.0, 0.0));
    hierarchy.add_object(detection.clone(), false);

    let mut tracker =
        ChangeTracker::with_diffable_kinds([ObjectKind::Annotation, ObjectKind::Detection]);
    tracker.retrack(&hierarchy).unwrap();

    assert_eq!(
        tracker.tracked_state(&detection.id),
        Some(&detection.to_state().unwrap())
    );
}

// ── track_changes / track_deletions ─────────────────────────────

#[test]
fn track_changes_creates_untracked_objects() {
    let mut tracker = ChangeTracker::new();
    let object = tumor_annotation("new");

    let events = tracker.track_changes([&object]).unwrap();

    assert_eq!(events.len(), 1);
    match &events[0] {
        Event::Create(create) => {
            assert_eq!(create.id, object.id);
            assert_eq!(create.fields, object.to_state().unwrap());
        }
        other => panic!("expected create, got {other:?}"),
    }
}

#[test]
fn track_changes_edits_with_top_level_diff() {
    let mut tracker = ChangeTracker::new();
    let mut object = tumor_annotation("before");
    tracker.track_changes([&object]).unwrap();

    object.name = Some("after".to_string());
    let events = tracker.track_changes([&object]).unwrap();

    match &events[0] {
        Event::Edit(edit) => {
            assert_eq!(edit.diff.keys().collect::<Vec<_>>(), vec!["properties"]);
            assert_eq!(edit.diff["properties"]["name"], json!("after"));
        }
        other => panic!("expected edit, got {other:?}"),
    }
    assert_eq!(
        tracker.tracked_state(&object.id),
        Some(&object.to_state().unwrap())
    );
}

#[test]
fn track_changes_emits_empty_edit_for_unchanged_object() {
    let mut tracker = ChangeTracker::new();
    let object = tumor_annotation("same");
    tracker.track_changes([&object]).unwrap();

    let events = tracker.track_changes([&object]).unwrap();
    match &events[0] {
        Event::Edit(edit) => assert!(edit.diff.is_empty()),
        other => panic!("expected edit, got {other:?}"),
    }
}

#[test]
fn track_deletions_untracks_and_emits_delete() {
    let mut tracker = ChangeTracker::new();
    let tracked = tumor_annotation("tracked");
    let untracked = tumor_annotation("untracked");
    tracker.track_changes([&tracked]).unwrap();

    let events = tracker.track_deletions([&tracked, &untracked]);

    assert_eq!(types(&events), vec![EventType::Delete, EventType::Delete]);
    assert_eq!(events[0].id(), tracked.id);
    assert_eq!(events[1].id(), untracked.id);
    assert!(tracker.is_empty());
}

// ── track_bulk ──────────────────────────────────────────────────

#[test]
fn track_bulk_reconciles_creates_edits_and_deletes() {
    init_tracing();
    let mut hierarchy = ObjectHierarchy::new();
    let kept = tumor_annotation("kept");
    let edited = tumor_annotation("edited");
    let removed = tumor_annotation("removed");
    for object in [&kept, &edited, &removed] {
        hierarchy.add_object(object.clone(), false);
    }

    let mut tracker = ChangeTracker::new();
    tracker.retrack(&hierarchy).unwrap();

    let added = tumor_annotation("added");
    hierarchy.add_object(added.clone(), false);
    hierarchy.remove_object(&removed.id, false);
    hierarchy.get_mut(&edited.id).unwrap().set_geometry(square(50.0, 50.0));

    let events = tracker.track_bulk(hierarchy.objects()).unwrap();

    let by_id: BTreeMap<_, _> = events.iter().map(|e| (e.id(), e.event_type())).collect();
    assert_eq!(events.len(), 3);
    assert_eq!(by_id[&added.id], EventType::Create);
    assert_eq!(by_id[&edited.id], EventType::Edit);
    assert_eq!(by_id[&removed.id], EventType::Delete);

    let timestamp = events[0].timestamp();
    assert!(events.iter().all(|e| e.timestamp() == timestamp));

    assert!(tracker.is_tracking(&added.id));
    assert!(!tracker.is_tracking(&removed.id));
    assert_eq!(
        tracker.tracked_state(&edited.id),
        Some(&hierarchy.get(&edited.id).unwrap().to_state().unwrap())
    );
}

#[test]
fn track_bulk_skips_edits_for_detections() {
    let mut hierarchy = ObjectHierarchy::new();
    let detection = PathObject::detection(square(0.0, 0.0));
    hierarchy.add_object(detection.clone(), false);

    let mut tracker = ChangeTracker::new();
    tracker.retrack(&hierarchy).unwrap();

    hierarchy.get_mut(&detection.id).unwrap().name = Some("cell".to_string());
    let events = tracker.track_bulk(hierarchy.objects()).unwrap();
    assert!(events.is_empty());
}

#[test]
fn track_bulk_deletes_vanished_detections() {
    let mut hierarchy = ObjectHierarchy::new();
    let detections: Vec<_> = (0..3)
        .map(|i| PathObject::detection(square(f64::from(i) * 20.0, 0.0)))
        .collect();
    hierarchy.add_objects(detections.clone(), false);

    let mut tracker = ChangeTracker::new();
    tracker.retrack(&hierarchy).unwrap();

    hierarchy.clear_all();
    let events = tracker.track_bulk(hierarchy.objects()).unwrap();

    assert_eq!(types(&events), vec![EventType::Delete; 3]);
    assert!(tracker.is_empty());
}

#[test]
fn track_changes_then_retrack_matches_bulk_from_empty() {
    let mut hierarchy = ObjectHierarchy::new();
    let a = tumor_annotation("a");
    let b = PathObject::annotation(Geometry::point(3.0, 4.0));
    hierarchy.add_objects(vec![a.clone(), b.clone()], false);

    let mut incremental = ChangeTracker::new();
    incremental.track_changes([&a, &b]).unwrap();
    incremental.retrack(&hierarchy).unwrap();

    let mut bulk = ChangeTracker::new();
    bulk.track_bulk(hierarchy.objects()).unwrap();

    assert_eq!(incremental.tracked(), bulk.tracked());
}

// ── retrack_objects ─────────────────────────────────────────────

#[test]
fn retrack_objects_refreshes_only_given_ids() {
    let mut hierarchy = ObjectHierarchy::new();
    let a = tumor_annotation("a");
    let b = tumor_annotation("b");
    let detection = PathObject::detection(square(0.0, 0.0));
    hierarchy.add_objects(vec![a.clone(), b.clone(), detection.clone()], false);

    let mut tracker = ChangeTracker::new();
    tracker.retrack(&hierarchy).unwrap();
    let b_before = tracker.tracked_state(&b.id).cloned();

    hierarchy.get_mut(&a.id).unwrap().name = Some("a2".to_string());
    hierarchy.get_mut(&b.id).unwrap().name = Some("b2".to_string());
    let gone = tumor_annotation("gone");
    tracker.track_changes([&gone]).unwrap();

    tracker
        .retrack_objects([&a.id, &detection.id, &gone.id], &hierarchy)
        .unwrap();

    assert_eq!(
        tracker.tracked_state(&a.id),
        Some(&hierarchy.get(&a.id).unwrap().to_state().unwrap())
    );
    assert_eq!(tracker.tracked_state(&b.id).cloned(), b_before);
    assert_eq!(tracker.tracked_state(&detection.id), Some(&ObjectState::new()));
    assert!(!tracker.is_tracking(&gone.id));
}

// ── Shallow diff clobbering ─────────────────────────────────────

/// Two writers edit different metadata keys of the same object from the same
/// base. Each edit carries the whole `properties` value, so whichever is
/// applied last wins and the other key's change is lost.
#[test]
fn concurrent_nested_edits_clobber_each_other() {
    let base = tumor_annotation("shared");

    let mut writer_a = ChangeTracker::new();
    let mut writer_b = ChangeTracker::new();
    writer_a.track_changes([&base]).unwrap();
    writer_b.track_changes([&base]).unwrap();

    let mut edit_a = base.clone();
    edit_a.metadata.insert("reviewer".to_string(), "alice".to_string());
    let mut edit_b = base.clone();
    edit_b.metadata.insert("status".to_string(), "done".to_string());

    let a = writer_a.track_changes([&edit_a]).unwrap();
    let b = writer_b.track_changes([&edit_b]).unwrap();

    let (Event::Edit(a), Event::Edit(b)) = (&a[0], &b[0]) else {
        panic!("expected edits");
    };
    let last_write = &b.diff["properties"]["metadata"];
    assert_eq!(last_write, &json!({"status": "done"}));
    assert!(a.diff["properties"]["metadata"].get("status").is_none());
}
