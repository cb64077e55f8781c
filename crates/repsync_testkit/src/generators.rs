//! Property-based test generators using proptest.

use proptest::prelude::*;
use repsync_protocol::models::WorkoutLog;
use repsync_protocol::{EntityType, OwnerId, Payload, RecordId, RemoteRecord, Timestamp};

/// Strategy for generating record ids.
pub fn record_id_strategy() -> impl Strategy<Value = RecordId> {
    prop::array::uniform16(any::<u8>()).prop_map(RecordId::from_bytes)
}

/// Strategy for generating owner ids.
pub fn owner_id_strategy() -> impl Strategy<Value = OwnerId> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}")
        .expect("Invalid regex")
        .prop_filter_map("owner must not be blank", |s| OwnerId::new(s).ok())
}

/// Strategy for picking a tracked entity type.
pub fn entity_type_strategy() -> impl Strategy<Value = EntityType> {
    prop::sample::select(EntityType::ALL.to_vec())
}

/// Strategy for plausible millisecond timestamps.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    1_600_000_000_000i64..1_900_000_000_000i64
}

/// Strategy for generating workout logs.
pub fn workout_log_strategy() -> impl Strategy<Value = WorkoutLog> {
    (
        prop::sample::select(vec!["strength", "run", "ride", "swim", "mobility"]),
        timestamp_strategy(),
        0u32..14_400,
        ".{0,40}",
    )
        .prop_map(|(workout_type, started_at, duration_secs, notes)| WorkoutLog {
            workout_type: workout_type.to_string(),
            started_at,
            duration_secs,
            notes,
        })
}

/// Strategy for opaque payloads.
pub fn payload_strategy() -> impl Strategy<Value = Payload> {
    prop::collection::vec(any::<u8>(), 0..256).prop_map(Payload::from_bytes)
}

/// Strategy for cloud rows belonging to `owner_id`.
pub fn remote_record_strategy(owner_id: OwnerId) -> impl Strategy<Value = RemoteRecord> {
    (
        record_id_strategy(),
        entity_type_strategy(),
        timestamp_strategy(),
        any::<bool>(),
        payload_strategy(),
    )
        .prop_map(move |(id, entity_type, updated_at, deleted, payload)| RemoteRecord {
            id,
            entity_type,
            owner_id: owner_id.clone(),
            updated_at,
            deleted_at: deleted.then_some(updated_at),
            payload,
        })
}
