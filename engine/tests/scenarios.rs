//! End-to-end scenarios for liquidata-engine
//!
//! These tests drive the cache and session the way a view layer would.

use liquidata_engine::{
    aggregate, filter, paginate, sort, ChangeEvent, Direction, Error, FeedMessage, Filter,
    InMemoryStore, Mutation, MutationStatus, Record, ReconcilingCache, RowSchema, Session,
    SortKey, StoreCall,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

fn row_record(row: serde_json::Value) -> Record {
    Record::from_row(&row).unwrap()
}

fn ids<'a>(records: impl IntoIterator<Item = &'a Record>) -> Vec<i64> {
    records.into_iter().map(|r| r.id).collect()
}

// ============================================================================
// Remote Changes
// ============================================================================

#[test]
fn insert_then_filter() {
    let mut cache = ReconcilingCache::new();
    cache
        .initialize(vec![
            row_record(json!({"id": 1, "score": "8", "favori": false})),
            row_record(json!({"id": 2, "score": "3", "favori": true})),
        ])
        .unwrap();

    let inserted = row_record(json!({"id": 3, "score": "9", "favori": false}));
    let snapshot = cache.apply(ChangeEvent::Inserted(inserted));

    let hits = filter(&snapshot, &Filter::new().score_min(5));
    assert_eq!(ids(hits), vec![3, 1]);
}

#[test]
fn insert_is_idempotent() {
    let mut cache = ReconcilingCache::new();
    cache.initialize(vec![Record::new(1)]).unwrap();

    let record = Record::new(2).with_name("Atelier Petit");
    let once = cache.apply(ChangeEvent::Inserted(record.clone()));
    let twice = cache.apply(ChangeEvent::Inserted(record));

    assert_eq!(once.records(), twice.records());
    assert_eq!(twice.len(), 2);
    assert!(twice.version() > once.version());
}

#[test]
fn delete_then_update_restores_record() {
    let mut cache = ReconcilingCache::new();
    cache
        .initialize(vec![Record::new(1), Record::new(2)])
        .unwrap();
    let before = cache.len();

    cache.apply(ChangeEvent::Deleted(2));
    let snapshot = cache.apply(ChangeEvent::Updated(Record::new(2).with_score(6)));

    assert_eq!(snapshot.len(), before);
    assert_eq!(snapshot.get(2).and_then(|r| r.score), Some(6));
}

#[test]
fn update_keeps_position() {
    let mut cache = ReconcilingCache::new();
    cache
        .initialize(vec![Record::new(1), Record::new(2), Record::new(3)])
        .unwrap();

    let snapshot = cache.apply(ChangeEvent::Updated(Record::new(2).with_city("Rennes")));
    assert_eq!(snapshot.ids(), vec![1, 2, 3]);
    assert_eq!(snapshot.get(2).unwrap().city.as_deref(), Some("Rennes"));
}

#[test]
fn delete_of_unknown_id_is_noop() {
    let mut cache = ReconcilingCache::new();
    cache.initialize(vec![Record::new(1)]).unwrap();

    let snapshot = cache.apply(ChangeEvent::Deleted(99));
    assert_eq!(snapshot.ids(), vec![1]);
}

#[test]
fn feed_message_with_bad_row_is_rejected() {
    let message: FeedMessage =
        serde_json::from_value(json!({"type": "INSERT", "record": {"id": "x"}})).unwrap();
    let err = message.into_event(&RowSchema::entreprise()).unwrap_err();
    assert!(matches!(err, Error::MalformedRecord { .. }));
}

// ============================================================================
// Optimistic Mutations
// ============================================================================

#[test]
fn rollback_restores_exact_prior_value() {
    let mut cache = ReconcilingCache::new();
    let original = vec![
        Record::new(1).with_name("A"),
        Record::new(2).with_name("B").with_score(4),
        Record::new(3).with_name("C"),
    ];
    cache.initialize(original.clone()).unwrap();

    let handle = cache
        .begin_optimistic_mutation(Mutation::set_favorite(vec![2], true))
        .unwrap();
    assert!(cache.get(2).unwrap().favorite);

    let snapshot = cache.rollback(&handle).unwrap();
    assert_eq!(snapshot.records(), original.as_slice());
}

#[test]
fn overlapping_mutations_apply_in_order() {
    let mut cache = ReconcilingCache::new();
    cache.initialize(vec![Record::new(1)]).unwrap();

    let first = cache
        .begin_optimistic_mutation(Mutation::set_favorite(vec![1], true))
        .unwrap();
    let second = cache
        .begin_optimistic_mutation(Mutation::set_favorite(vec![1], false))
        .unwrap();
    assert_eq!(cache.status(&second), Some(MutationStatus::Queued));
    assert!(cache.get(1).unwrap().favorite);

    cache.confirm(&first).unwrap();
    assert_eq!(cache.status(&second), Some(MutationStatus::InFlight));
    assert!(!cache.get(1).unwrap().favorite);
}

#[test]
fn snapshots_arrive_in_version_order() {
    let mut cache = ReconcilingCache::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let subscription = cache.subscribe(move |s| sink.lock().unwrap().push(s.version()));

    cache.initialize(vec![Record::new(1)]).unwrap();
    cache.apply(ChangeEvent::Inserted(Record::new(2)));
    let handle = cache
        .begin_optimistic_mutation(Mutation::toggle_favorite(1))
        .unwrap();
    cache.rollback(&handle).unwrap();

    subscription.unsubscribe();
    subscription.unsubscribe();
    cache.apply(ChangeEvent::Deleted(2));

    let versions = seen.lock().unwrap().clone();
    assert_eq!(versions.len(), 5);
    assert!(versions.windows(2).all(|w| w[0] < w[1]));
}

// ============================================================================
// Session Round Trips
// ============================================================================

#[tokio::test]
async fn failed_bulk_delete_rolls_back() {
    let records = vec![Record::new(1), Record::new(2), Record::new(3)];
    let store = Arc::new(InMemoryStore::from_records(&records));
    let session = Session::new(store.clone());
    session.load().await.unwrap();
    let before = session.snapshot();

    store.fail_mutations("row level security");
    let err = session.delete_many(&[1, 2]).await.unwrap_err();

    assert!(matches!(err, Error::Mutation { ref ids, .. } if ids == &vec![1, 2]));
    let after = session.snapshot();
    assert_eq!(after.records(), before.records());
    assert_eq!(store.calls().last(), Some(&StoreCall::DeleteMany(vec![1, 2])));
}

#[tokio::test]
async fn echoed_change_after_confirm_is_harmless() {
    let store = Arc::new(InMemoryStore::from_records(&[Record::new(1), Record::new(2)]));
    let session = Arc::new(Session::new(store.clone()));
    session.load().await.unwrap();
    let task = session.follow().await.unwrap();

    session.toggle_favorite(2).await.unwrap();
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }

    let snapshot = session.snapshot();
    assert_eq!(snapshot.ids(), vec![1, 2]);
    assert!(snapshot.get(2).unwrap().favorite);

    task.cancel();
    task.join().await.unwrap();
}

#[tokio::test]
async fn concurrent_toggles_on_same_record_serialize() {
    let store = Arc::new(InMemoryStore::from_records(&[Record::new(1)]).with_echo(false));
    let session = Session::new(store.clone());
    session.load().await.unwrap();

    let (a, b) = tokio::join!(session.toggle_favorite(1), session.toggle_favorite(1));
    a.unwrap();
    b.unwrap();

    assert!(!session.snapshot().get(1).unwrap().favorite);
    let sent: Vec<StoreCall> = store.calls().into_iter().skip(1).collect();
    assert_eq!(sent.len(), 2);
}

#[tokio::test]
async fn events_before_load_are_replayed() {
    let store = Arc::new(InMemoryStore::from_records(&[Record::new(1)]));
    let session = Arc::new(Session::new(store.clone()));
    let task = session.follow().await.unwrap();

    store.emit(FeedMessage::Insert {
        record: Record::new(2).to_row(),
    });
    for _ in 0..100 {
        if session.with_cache(|c| c.buffered_count()) == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }

    let snapshot = session.load().await.unwrap();
    assert_eq!(snapshot.ids(), vec![2, 1]);

    task.cancel();
    task.join().await.unwrap();
}

// ============================================================================
// Views
// ============================================================================

#[test]
fn listing_pipeline() {
    let records: Vec<Record> = (1..=30)
        .map(|i| {
            Record::new(i)
                .with_name(format!("Entreprise {:02}", i))
                .with_department(if i % 2 == 0 { "44" } else { "35" })
                .with_score(i % 10 + 1)
        })
        .collect();

    let hits = filter(&records, &Filter::new().department("44"));
    let ordered = sort(hits, SortKey::Name, Direction::Desc);
    let page = paginate(&ordered, 14, 1);

    assert_eq!(page.total_items, 15);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.items[0].id, 30);

    let last = paginate(&ordered, 14, 2);
    assert_eq!(last.items.len(), 1);
    assert!(paginate(&ordered, 14, 3).items.is_empty());
}

#[test]
fn statistics_over_empty_snapshot() {
    let cache = ReconcilingCache::new();
    let stats = aggregate(&cache.snapshot());
    assert_eq!(stats.total, 0);
    assert!(stats.by_city.is_empty());
    assert!(stats.average_score.is_none());
}
