mod support;

use proptest::prelude::*;
use tasksync::{RecordStore, StoreEvent};

use support::{record, RecordBuilder};

fn apply_all(events: &[StoreEvent]) -> RecordStore {
    let mut store = RecordStore::new();
    for event in events {
        store.apply(event.clone());
    }
    store
}

/// Causally consistent histories: one insert per id, then updates with
/// increasing `updated_at`, then maybe a removal.
fn history() -> impl Strategy<Value = Vec<StoreEvent>> {
    prop::collection::vec((1usize..4, any::<bool>(), "[a-z]{1,8}"), 1..5).prop_map(|plans| {
        let mut events = Vec::new();
        for (idx, (versions, removed, title)) in plans.into_iter().enumerate() {
            let id = format!("task-{idx}");
            for version in 0..versions {
                let record = RecordBuilder::new(&id, &format!("{title} v{version}"))
                    .completed(version % 2 == 1)
                    .updated(version as i64)
                    .build();
                events.push(if version == 0 {
                    StoreEvent::Inserted(record)
                } else {
                    StoreEvent::Updated(record)
                });
            }
            if removed {
                events.push(StoreEvent::Removed(id));
            }
        }
        events
    })
}

fn history_and_shuffle() -> impl Strategy<Value = (Vec<StoreEvent>, Vec<StoreEvent>)> {
    history().prop_flat_map(|events| {
        let shuffled = Just(events.clone()).prop_shuffle();
        (Just(events), shuffled)
    })
}

proptest! {
    #[test]
    fn prop_any_delivery_order_converges((events, shuffled) in history_and_shuffle()) {
        let in_order = apply_all(&events);
        let reordered = apply_all(&shuffled);
        prop_assert_eq!(in_order.records(), reordered.records());
    }

    #[test]
    fn prop_duplicate_delivery_is_harmless(events in history()) {
        let once = apply_all(&events);
        let twice: Vec<StoreEvent> = events
            .iter()
            .flat_map(|event| [event.clone(), event.clone()])
            .collect();
        prop_assert_eq!(once.records(), apply_all(&twice).records());
    }

    #[test]
    fn prop_inserted_twice_equals_once(title in "[A-Za-z ]{1,40}", completed in any::<bool>()) {
        let task = RecordBuilder::new("42", title.trim_end()).completed(completed).build();
        let once = apply_all(&[StoreEvent::Inserted(task.clone())]);
        let twice = apply_all(&[
            StoreEvent::Inserted(task.clone()),
            StoreEvent::Inserted(task),
        ]);
        prop_assert_eq!(once.records(), twice.records());
        prop_assert_eq!(twice.len(), 1);
    }
}

#[test]
fn insert_update_remove_converge_in_every_order() {
    let inserted = StoreEvent::Inserted(record("r1", "Buy milk"));
    let updated = StoreEvent::Updated(
        RecordBuilder::new("r1", "Buy oat milk")
            .updated(5)
            .build(),
    );
    let removed = StoreEvent::Removed("r1".to_string());

    let orders = [
        [&inserted, &updated, &removed],
        [&inserted, &removed, &updated],
        [&updated, &inserted, &removed],
        [&updated, &removed, &inserted],
        [&removed, &inserted, &updated],
        [&removed, &updated, &inserted],
    ];
    for order in orders {
        let events: Vec<StoreEvent> = order.iter().map(|event| (*event).clone()).collect();
        let store = apply_all(&events);
        assert!(store.is_empty(), "order {events:?} left {:?}", store.records());
    }
}

#[test]
fn update_then_stale_insert_keeps_update() {
    let newer = RecordBuilder::new("r1", "Newer").updated(10).build();
    let store = apply_all(&[
        StoreEvent::Updated(newer.clone()),
        StoreEvent::Inserted(record("r1", "Older")),
    ]);
    assert_eq!(store.records(), vec![newer]);
}

#[test]
fn records_snapshot_orders_by_creation_then_id() {
    let store = apply_all(&[
        StoreEvent::Inserted(RecordBuilder::new("b", "B").created(1).build()),
        StoreEvent::Inserted(RecordBuilder::new("c", "C").created(0).build()),
        StoreEvent::Inserted(RecordBuilder::new("a", "A").created(1).build()),
    ]);
    let ids: Vec<String> = store.records().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["c", "a", "b"]);
}
