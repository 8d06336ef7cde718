mod common;

use bytes::Bytes;
use common::session;
use granary_core::GrainRef;
use granary_store::{
    GrainStateStore, SerializationProvider, SerializerRegistry, StoreError, StoreResult,
};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Counter {
    value: i64,
    label: String,
}

#[tokio::test]
async fn fresh_grain_reads_default_state_with_no_token() {
    let store = GrainStateStore::new(session());
    store.initialize().await.unwrap();

    let read = store
        .read::<Counter>("counter", &GrainRef::Integer(1))
        .await
        .unwrap();
    assert_eq!(read.state, Counter::default());
    assert_eq!(read.etag, None);
}

#[tokio::test]
async fn write_then_read_round_trips_state_and_token() {
    let store = GrainStateStore::new(session());
    store.initialize().await.unwrap();

    let grain = GrainRef::Guid(Uuid::new_v4());
    let state = Counter {
        value: 7,
        label: "seven".to_string(),
    };
    let etag = store.write("counter", &grain, &state, None).await.unwrap();

    let read = store.read::<Counter>("counter", &grain).await.unwrap();
    assert_eq!(read.state, state);
    assert_eq!(read.etag, Some(etag));

    // A follow-up write presenting the fresh token succeeds and rotates it.
    let next = store
        .write("counter", &grain, &Counter { value: 8, ..state }, Some(etag))
        .await
        .unwrap();
    assert_ne!(next, etag);
    assert_eq!(
        store.read::<Counter>("counter", &grain).await.unwrap().state.value,
        8
    );
}

#[tokio::test]
async fn stale_token_write_conflicts_and_leaves_state_untouched() {
    let session = session();
    let store = GrainStateStore::new(session.clone());
    store.initialize().await.unwrap();

    let grain = GrainRef::Integer(5);
    let first = Counter {
        value: 1,
        label: "one".to_string(),
    };
    let stale = store.write("counter", &grain, &first, None).await.unwrap();
    let current = store
        .write("counter", &grain, &Counter { value: 2, ..first.clone() }, Some(stale))
        .await
        .unwrap();

    let payload_before = session.storage_payload("counter", &grain.encode()).unwrap();
    let result = store
        .write("counter", &grain, &Counter { value: 99, ..first }, Some(stale))
        .await;
    match result {
        Err(StoreError::VersionConflict { .. }) => {}
        other => panic!("expected a version conflict, got {other:?}"),
    }
    assert_eq!(
        session.storage_payload("counter", &grain.encode()).unwrap(),
        payload_before
    );

    // The holder of the current token is unaffected by the failed write.
    store
        .write("counter", &grain, &Counter::default(), Some(current))
        .await
        .unwrap();
}

#[tokio::test]
async fn missing_token_write_conflicts_when_a_row_exists() {
    let store = GrainStateStore::new(session());
    store.initialize().await.unwrap();

    let grain = GrainRef::Integer(5);
    store
        .write("counter", &grain, &Counter::default(), None)
        .await
        .unwrap();

    // "Never persisted" no longer holds, so the insert-shaped write loses.
    let result = store
        .write("counter", &grain, &Counter::default(), None)
        .await;
    assert!(matches!(result, Err(StoreError::VersionConflict { .. })));
}

#[tokio::test]
async fn clear_deletes_the_row_and_is_a_noop_without_a_token() {
    let store = GrainStateStore::new(session());
    store.initialize().await.unwrap();

    let grain = GrainRef::Integer(3);
    store.clear::<Counter>("counter", &grain, None).await.unwrap();

    let etag = store
        .write(
            "counter",
            &grain,
            &Counter {
                value: 3,
                label: "three".to_string(),
            },
            None,
        )
        .await
        .unwrap();
    store
        .clear::<Counter>("counter", &grain, Some(etag))
        .await
        .unwrap();

    let read = store.read::<Counter>("counter", &grain).await.unwrap();
    assert_eq!(read.state, Counter::default());
    assert_eq!(read.etag, None);

    // After the row is gone a fresh insert-shaped write works again.
    store
        .write("counter", &grain, &Counter::default(), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn incomplete_stored_row_fails_loudly() {
    let session = session();
    let store = GrainStateStore::new(session.clone());
    store.initialize().await.unwrap();

    let grain = GrainRef::Integer(11);
    session.insert_raw_storage_row(
        "counter",
        grain.encode(),
        Some(Bytes::from_static(b"{}")),
        None,
        None,
    );

    let result = store.read::<Counter>("counter", &grain).await;
    assert!(matches!(result, Err(StoreError::InconsistentState(_))));
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Mark {
    n: u8,
}

/// Single-byte codec claiming only [`Mark`].
struct MarkProvider;

impl SerializationProvider for MarkProvider {
    fn is_supported_type(&self, ty: TypeId) -> bool {
        ty == TypeId::of::<Mark>()
    }

    fn type_string(&self, base_type: &str) -> String {
        format!("mark.{base_type}")
    }

    fn serialize(&self, state: &dyn Any) -> StoreResult<Bytes> {
        let mark = state
            .downcast_ref::<Mark>()
            .ok_or_else(|| StoreError::Serialization("not a Mark".to_string()))?;
        Ok(Bytes::copy_from_slice(&[mark.n]))
    }

    fn deserialize(&self, _ty: TypeId, data: &[u8]) -> StoreResult<Box<dyn Any + Send>> {
        match data {
            [n] => Ok(Box::new(Mark { n: *n })),
            _ => Err(StoreError::Serialization("bad Mark payload".to_string())),
        }
    }
}

#[tokio::test]
async fn registered_provider_owns_its_types_payload_and_type_string() {
    let session = session();
    let mut registry = SerializerRegistry::new();
    registry.register(4, Arc::new(MarkProvider)).unwrap();
    let store = GrainStateStore::with_serializers(session.clone(), Arc::new(registry));
    store.initialize().await.unwrap();

    let grain = GrainRef::Integer(21);
    let etag = store
        .write("mark", &grain, &Mark { n: 200 }, None)
        .await
        .unwrap();

    // Stored under the provider's type string, as its raw payload.
    assert_eq!(
        session.storage_payload("mark.mark", &grain.encode()).unwrap(),
        Bytes::copy_from_slice(&[200])
    );
    assert!(session.storage_payload("mark", &grain.encode()).is_none());

    let read = store.read::<Mark>("mark", &grain).await.unwrap();
    assert_eq!(read.state, Mark { n: 200 });
    assert_eq!(read.etag, Some(etag));

    // Types the provider does not claim still take the default path.
    let counter_grain = GrainRef::Integer(22);
    store
        .write("counter", &counter_grain, &Counter::default(), None)
        .await
        .unwrap();
    let payload = session
        .storage_payload("counter", &counter_grain.encode())
        .unwrap();
    serde_json::from_slice::<Counter>(&payload).unwrap();
}

#[tokio::test]
async fn row_written_by_an_unconfigured_serializer_is_unreadable() {
    let session = session();
    let store = GrainStateStore::new(session.clone());
    store.initialize().await.unwrap();

    let grain = GrainRef::Integer(31);
    session.insert_raw_storage_row(
        "counter",
        grain.encode(),
        Some(Bytes::from_static(b"\x01")),
        Some(9),
        Some(Uuid::new_v4()),
    );

    let result = store.read::<Counter>("counter", &grain).await;
    assert!(matches!(result, Err(StoreError::Config(_))));
}
