mod common;

use common::{session, KeyHasher};
use granary_core::{partition_of, rebias_to_signed, GrainRef, REMINDER_PARTITION_BITS};
use granary_store::{MemorySession, ReminderEntry, ReminderStore, StoreError};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

fn reminder(grain: GrainRef, name: &str) -> ReminderEntry {
    ReminderEntry {
        grain,
        name: name.to_string(),
        start_at: OffsetDateTime::now_utc(),
        period: Duration::minutes(5),
        etag: None,
    }
}

fn store_at_key_positions(session: Arc<MemorySession>) -> ReminderStore {
    ReminderStore::with_hasher(session, Arc::new(KeyHasher))
}

#[tokio::test]
async fn upsert_read_remove_round_trip() {
    let store = ReminderStore::new(session());
    store.initialize().await.unwrap();

    let entry = reminder(GrainRef::Integer(42), "tick");
    let etag = store.upsert(&entry).await.unwrap();

    let read = store.read_row(&entry.grain, "tick").await.unwrap().unwrap();
    assert_eq!(read.grain, entry.grain);
    assert_eq!(read.name, "tick");
    assert_eq!(read.period, entry.period);
    assert_eq!(read.etag, Some(etag));

    assert!(store.remove(&entry.grain, "tick", etag).await.unwrap());
    assert!(store.read_row(&entry.grain, "tick").await.unwrap().is_none());
    // Second removal with the same token finds nothing to apply to.
    assert!(!store.remove(&entry.grain, "tick", etag).await.unwrap());
}

#[tokio::test]
async fn reupserting_invalidates_the_previous_token() {
    let store = ReminderStore::new(session());
    store.initialize().await.unwrap();

    let entry = reminder(GrainRef::Guid(Uuid::new_v4()), "tick");
    let first = store.upsert(&entry).await.unwrap();
    let second = store.upsert(&entry).await.unwrap();
    assert_ne!(first, second);

    assert!(!store.remove(&entry.grain, "tick", first).await.unwrap());
    assert!(store.remove(&entry.grain, "tick", second).await.unwrap());
}

#[tokio::test]
async fn period_past_the_stored_millisecond_range_is_rejected() {
    let store = ReminderStore::new(session());
    store.initialize().await.unwrap();

    let mut entry = reminder(GrainRef::Integer(1), "tick");
    entry.period = Duration::days(30);
    assert!(matches!(
        store.upsert(&entry).await,
        Err(StoreError::Serialization(_))
    ));
    assert!(store.read_row(&entry.grain, "tick").await.unwrap().is_none());

    // The widest representable period still goes through.
    entry.period = Duration::milliseconds(i64::from(i32::MAX));
    store.upsert(&entry).await.unwrap();
}

#[tokio::test]
async fn read_rows_lists_one_grains_reminders_only() {
    let store = ReminderStore::new(session());
    store.initialize().await.unwrap();

    let grain = GrainRef::IntegerWithExt(7, "shard-a".to_string());
    let other = GrainRef::IntegerWithExt(7, "shard-b".to_string());
    store.upsert(&reminder(grain.clone(), "tick")).await.unwrap();
    store.upsert(&reminder(grain.clone(), "tock")).await.unwrap();
    store.upsert(&reminder(other, "tick")).await.unwrap();

    let mut names: Vec<_> = store
        .read_rows(&grain)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    names.sort();
    assert_eq!(names, ["tick", "tock"]);
}

#[tokio::test]
async fn range_scan_honors_inclusive_bounds() {
    let session = session();
    let store = store_at_key_positions(session);
    store.initialize().await.unwrap();

    for hash in [100_u32, 150, 250, 300] {
        store
            .upsert(&reminder(GrainRef::Integer(i64::from(hash)), "tick"))
            .await
            .unwrap();
    }

    let mut hits: Vec<_> = store
        .read_range(150, 250)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.grain)
        .collect();
    hits.sort_by_key(|g| match g {
        GrainRef::Integer(v) => *v,
        _ => 0,
    });
    assert_eq!(hits, [GrainRef::Integer(150), GrainRef::Integer(250)]);
}

#[tokio::test]
async fn wrapping_range_scans_both_arcs() {
    let session = session();
    let store = store_at_key_positions(session);
    store.initialize().await.unwrap();

    let high = GrainRef::Integer(i64::from(u32::MAX - 2));
    let low = GrainRef::Integer(5);
    let middle = GrainRef::Integer(1_000_000);
    for grain in [&high, &low, &middle] {
        store.upsert(&reminder(grain.clone(), "tick")).await.unwrap();
    }

    let hits: Vec<_> = store
        .read_range(u32::MAX - 10, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.grain)
        .collect();
    assert_eq!(hits.len(), 2);
    assert!(hits.contains(&high));
    assert!(hits.contains(&low));
}

#[tokio::test]
async fn degenerate_range_covers_the_whole_ring() {
    let session = session();
    let store = store_at_key_positions(session);
    store.initialize().await.unwrap();

    for key in [0_i64, 76, i64::from(u32::MAX)] {
        store
            .upsert(&reminder(GrainRef::Integer(key), "tick"))
            .await
            .unwrap();
    }

    assert_eq!(store.read_range(77, 77).await.unwrap().len(), 3);
}

#[tokio::test]
async fn range_scan_skips_undecodable_rows() {
    let session = session();
    let store = store_at_key_positions(session.clone());
    store.initialize().await.unwrap();

    store
        .upsert(&reminder(GrainRef::Integer(200), "tick"))
        .await
        .unwrap();

    // A row whose grain key blob no reader can decode, placed inside the
    // scanned window.
    let hash = rebias_to_signed(210);
    session.insert_raw_reminder_row(
        partition_of(hash, REMINDER_PARTITION_BITS),
        hash,
        vec![0xFF, 0xFF],
        "broken",
        OffsetDateTime::now_utc(),
        60_000,
        Uuid::new_v4(),
    );

    let hits = store.read_range(100, 300).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].grain, GrainRef::Integer(200));
}

#[tokio::test]
async fn clear_table_removes_everything() {
    let store = ReminderStore::new(session());
    store.initialize().await.unwrap();

    let grain = GrainRef::Integer(9);
    store.upsert(&reminder(grain.clone(), "tick")).await.unwrap();
    store.clear_table().await.unwrap();
    assert!(store.read_rows(&grain).await.unwrap().is_empty());
}
