//! End-to-end tracking lifecycle
//!
//! These tests play the role of the persistence layer: they keep the live
//! rows in a `MemorySource`, mutate them, and deliver the corresponding
//! lifecycle events to the tracker.

use chronicle::{
    ActingContext, AmbientUser, EntityDef, FieldDef, HistoryError, HistoryTracker, HistoryType,
    JsonlHistoryStore, MemoryHistoryStore, MemorySource, Record, RelationAction, RelationDef,
    ThroughRef, TrackingOptions,
};
use chrono::Utc;
use serde_json::{json, Value};

fn poll_entity() -> EntityDef {
    EntityDef::new("polls", "Poll", "polls")
        .with_field(FieldDef::auto("id"))
        .with_field(FieldDef::char("question", 200))
        .with_field(FieldDef::char("secret", 50))
}

fn poll_tags_entity() -> EntityDef {
    EntityDef::new("polls", "PollTag", "poll_tags")
        .with_field(FieldDef::auto("id"))
        .with_field(FieldDef::foreign_key("poll", "polls"))
        .with_field(FieldDef::foreign_key("tag", "tags"))
}

fn tracked_poll_tracker(source: &MemorySource) -> HistoryTracker {
    let mut tracker = HistoryTracker::new(MemoryHistoryStore::new(), source.clone());
    let entity = poll_entity().with_relation(RelationDef::many_to_many(
        "tags",
        "tags",
        ThroughRef::Resolved(Box::new(poll_tags_entity())),
    ));
    tracker
        .track(
            entity,
            TrackingOptions::new()
                .with_excluded_field("secret")
                .with_m2m_field("tags"),
        )
        .unwrap();
    tracker
}

fn poll_record(id: i64, question: &str, secret: &str) -> Record {
    Record::new("polls")
        .with_value("id", id)
        .with_value("question", question)
        .with_value("secret", secret)
}

fn join_record(id: i64, poll: i64, tag: i64) -> Record {
    Record::new("poll_tags")
        .with_value("id", id)
        .with_value("poll_id", poll)
        .with_value("tag_id", tag)
}

#[test]
fn create_update_delete_produce_one_row_each() {
    let source = MemorySource::new();
    let tracker = tracked_poll_tracker(&source);
    let ctx = ActingContext::anonymous();

    let mut poll = poll_record(1, "original?", "s3cret");
    source.upsert(poll.clone(), "id");
    tracker.record_saved(&poll, true, false, &ctx).unwrap();

    poll.set("question", "updated?");
    source.upsert(poll.clone(), "id");
    tracker.record_saved(&poll, false, false, &ctx).unwrap();

    source.remove("polls", "id", &json!(1));
    tracker.record_deleted(&poll, &ctx).unwrap();

    let history = tracker.history("polls").unwrap();
    let rows = history.for_instance(&json!(1)).unwrap();
    assert_eq!(rows.len(), 3);
    // Newest first.
    let types: Vec<_> = rows.iter().map(|r| r.history_type).collect();
    assert_eq!(
        types,
        vec![HistoryType::Deleted, HistoryType::Changed, HistoryType::Created]
    );
    assert_eq!(rows[2].fields["question"], json!("original?"));
    assert_eq!(rows[1].fields["question"], json!("updated?"));
    // Deletion captured the values as they stood before removal.
    assert_eq!(rows[0].fields["question"], json!("updated?"));
}

#[test]
fn equal_timestamps_order_by_id_descending() {
    let source = MemorySource::new();
    let tracker = tracked_poll_tracker(&source);
    let ctx = ActingContext::anonymous();
    let date = Utc::now();

    let poll = poll_record(1, "first", "s").with_history_date(date);
    let first = tracker
        .record_saved(&poll, true, false, &ctx)
        .unwrap()
        .unwrap();
    let poll = poll_record(1, "second", "s").with_history_date(date);
    let second = tracker
        .record_saved(&poll, false, false, &ctx)
        .unwrap()
        .unwrap();

    let rows = tracker
        .history("polls")
        .unwrap()
        .for_instance(&json!(1))
        .unwrap();
    assert_eq!(rows[0].history_id, second.history_id);
    assert_eq!(rows[1].history_id, first.history_id);
    assert!(rows[0].history_id > rows[1].history_id);
}

#[test]
fn excluded_fields_stay_out_of_snapshots_and_come_back_live() {
    let source = MemorySource::new();
    let tracker = tracked_poll_tracker(&source);
    let ctx = ActingContext::anonymous();

    let poll = poll_record(1, "q?", "original-secret");
    source.upsert(poll.clone(), "id");
    tracker.record_saved(&poll, true, false, &ctx).unwrap();

    let history = tracker.history("polls").unwrap();
    let row = history.most_recent(&json!(1)).unwrap().unwrap();
    assert!(!row.fields.contains_key("secret"));

    // Reconstruction pulls the *current* live value, not the one at
    // capture time.
    let updated = poll_record(1, "q?", "rotated-secret");
    source.upsert(updated, "id");
    let instance = history.reconstruct(&row).unwrap();
    assert_eq!(instance.get("secret"), Some(&json!("rotated-secret")));
    assert_eq!(instance.get("question"), Some(&json!("q?")));

    // Once the live record is gone the lookup failure propagates.
    source.remove("polls", "id", &json!(1));
    let err = history.reconstruct(&row).unwrap_err();
    assert!(matches!(err, HistoryError::LiveRecordMissing { .. }));
}

#[test]
fn skip_flag_suppresses_updates_but_not_creates() {
    let source = MemorySource::new();
    let tracker = tracked_poll_tracker(&source);
    let ctx = ActingContext::anonymous();

    // A brand-new instance records its initial row even when asked to
    // skip.
    let poll = poll_record(1, "q?", "s").without_history();
    let row = tracker.record_saved(&poll, true, false, &ctx).unwrap();
    assert_eq!(row.unwrap().history_type, HistoryType::Created);

    // The same flag on an update records nothing.
    let poll = poll_record(1, "q2?", "s").without_history();
    let row = tracker.record_saved(&poll, false, false, &ctx).unwrap();
    assert!(row.is_none());
    assert_eq!(tracker.history("polls").unwrap().count().unwrap(), 1);
}

#[test]
fn acting_user_follows_context_per_unit_of_work() {
    let source = MemorySource::new();
    let tracker = tracked_poll_tracker(&source);

    let ctx = ActingContext::with_user(AmbientUser::new(7));
    let poll = poll_record(1, "q?", "s");
    let row = tracker.record_saved(&poll, true, false, &ctx).unwrap().unwrap();
    assert_eq!(row.history_user, Some(json!(7)));

    // Next unit of work has no binding: acting user is null.
    let row = tracker
        .record_saved(&poll, false, false, &ActingContext::anonymous())
        .unwrap()
        .unwrap();
    assert_eq!(row.history_user, None);
}

#[test]
fn relation_add_remove_clear_history() {
    let source = MemorySource::new();
    let tracker = tracked_poll_tracker(&source);
    let ctx = ActingContext::anonymous();

    let poll = poll_record(1, "q?", "s");
    source.upsert(poll.clone(), "id");

    // Mapper links tags {1,2,3}, then reports the add.
    for (row_id, tag) in [(10, 1), (11, 2), (12, 3)] {
        source.upsert(join_record(row_id, 1, tag), "id");
    }
    let added: Vec<Value> = vec![json!(1), json!(2), json!(3)];
    let rows = tracker
        .relation_changed(&poll, "poll_tags", "tags", RelationAction::Add, Some(&added), &ctx)
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.history_type == HistoryType::Created));

    // Removing only tag 2 affects exactly one join row.
    let removed = vec![json!(2)];
    let rows = tracker
        .relation_changed(&poll, "poll_tags", "tags", RelationAction::Remove, Some(&removed), &ctx)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].history_type, HistoryType::Deleted);
    assert_eq!(rows[0].fields["tag_id"], json!(2));
    source.remove("poll_tags", "tag_id", &json!(2));

    // A full clear affects every remaining join row.
    let rows = tracker
        .relation_changed(&poll, "poll_tags", "tags", RelationAction::Clear, None, &ctx)
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.history_type == HistoryType::Deleted));

    let history = tracker.history("poll_tags").unwrap();
    assert_eq!(history.count().unwrap(), 6);
}

#[test]
fn relation_add_honors_skip_flag_removal_does_not() {
    let source = MemorySource::new();
    let tracker = tracked_poll_tracker(&source);
    let ctx = ActingContext::anonymous();

    let poll = poll_record(1, "q?", "s").without_history();
    source.upsert(poll.clone(), "id");
    source.upsert(join_record(10, 1, 1), "id");

    let keys = vec![json!(1)];
    let rows = tracker
        .relation_changed(&poll, "poll_tags", "tags", RelationAction::Add, Some(&keys), &ctx)
        .unwrap();
    assert!(rows.is_empty());

    // Removal is always recorded.
    let rows = tracker
        .relation_changed(&poll, "poll_tags", "tags", RelationAction::Remove, Some(&keys), &ctx)
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[test]
fn redeclaring_tracking_fails_before_any_save() {
    let source = MemorySource::new();
    let mut tracker = HistoryTracker::new(MemoryHistoryStore::new(), source);
    tracker.track(poll_entity(), TrackingOptions::default()).unwrap();
    let err = tracker
        .track(poll_entity(), TrackingOptions::default())
        .unwrap_err();
    assert!(matches!(err, HistoryError::MultipleRegistration { .. }));
}

#[test]
fn lifecycle_persists_through_jsonl_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.jsonl");
    let source = MemorySource::new();
    let ctx = ActingContext::with_user(AmbientUser::new("editor"));

    {
        let store = JsonlHistoryStore::open(&path).unwrap();
        let mut tracker = HistoryTracker::new(store, source.clone());
        tracker.track(poll_entity(), TrackingOptions::default()).unwrap();

        let poll = poll_record(1, "q?", "s");
        tracker.record_saved(&poll, true, false, &ctx).unwrap();
        tracker.record_deleted(&poll, &ctx).unwrap();
    }

    // A fresh process sees the same append-only log.
    let store = JsonlHistoryStore::open(&path).unwrap();
    let mut tracker = HistoryTracker::new(store, source);
    tracker.track(poll_entity(), TrackingOptions::default()).unwrap();
    let history = tracker.history("polls").unwrap();
    let rows = history.for_instance(&json!(1)).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].history_type, HistoryType::Deleted);
    assert_eq!(rows[0].history_user, Some(json!("editor")));
    assert!(rows.iter().all(|r| r.verify_checksum()));
}
