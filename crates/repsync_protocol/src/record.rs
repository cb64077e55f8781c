//! Synced records and the values exchanged with the cloud store.

use crate::entity::EntityType;
use crate::id::{OwnerId, RecordId};
use crate::payload::Payload;
use serde::{Deserialize, Serialize};

/// Unix timestamp in milliseconds.
pub type Timestamp = i64;

/// Upload state of a local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncState {
    /// Matches the last known cloud state.
    Clean,
    /// Has a local mutation the cloud has not acknowledged.
    Dirty,
    /// Is part of an upload that has not completed yet.
    Pushing,
}

impl SyncState {
    /// Returns true if the record has changes the cloud has not acknowledged.
    pub fn is_pending(&self) -> bool {
        !matches!(self, SyncState::Clean)
    }
}

/// A locally stored record together with its sync metadata.
///
/// # Invariants
///
/// - `id` is identical on every device and in the cloud
/// - `updated_at` never decreases for a given `id`
/// - A non-null `deleted_at` marks a tombstone; tombstones stay in the store
///   until both sides have observed them and the retention window passed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncableRecord {
    /// Record identifier.
    pub id: RecordId,
    /// Entity type (selects the cloud table).
    pub entity_type: EntityType,
    /// Owning user.
    pub owner_id: OwnerId,
    /// Last mutation time, local or remote.
    pub updated_at: Timestamp,
    /// Tombstone time, if logically deleted.
    pub deleted_at: Option<Timestamp>,
    /// Upload state.
    pub sync_state: SyncState,
    /// Entity-specific fields.
    pub payload: Payload,
    /// `updated_at` last confirmed to match the cloud, `None` if never uploaded.
    pub last_synced_at: Option<Timestamp>,
    /// `updated_at` carried by the upload currently in flight.
    pub in_flight_at: Option<Timestamp>,
    /// Reason the cloud permanently rejected the last upload.
    pub sync_error: Option<String>,
}

impl SyncableRecord {
    /// Creates a new dirty record that has never reached the cloud.
    pub fn new(
        id: RecordId,
        entity_type: EntityType,
        owner_id: OwnerId,
        payload: Payload,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            id,
            entity_type,
            owner_id,
            updated_at,
            deleted_at: None,
            sync_state: SyncState::Dirty,
            payload,
            last_synced_at: None,
            in_flight_at: None,
            sync_error: None,
        }
    }

    /// Creates a clean local copy of a record received from the cloud.
    pub fn from_remote(remote: RemoteRecord) -> Self {
        Self {
            id: remote.id,
            entity_type: remote.entity_type,
            owner_id: remote.owner_id,
            updated_at: remote.updated_at,
            deleted_at: remote.deleted_at,
            sync_state: SyncState::Clean,
            payload: remote.payload,
            last_synced_at: Some(remote.updated_at),
            in_flight_at: None,
            sync_error: None,
        }
    }

    /// Returns true if the record is logically deleted.
    pub fn is_tombstone(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns true if the cloud has acknowledged some version of this record.
    pub fn has_reached_cloud(&self) -> bool {
        self.last_synced_at.is_some()
    }

    /// Builds the cloud representation of this record.
    pub fn to_remote(&self) -> RemoteRecord {
        RemoteRecord {
            id: self.id,
            entity_type: self.entity_type,
            owner_id: self.owner_id.clone(),
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
            payload: self.payload.clone(),
        }
    }

    /// Builds a delete request, or `None` if the record is not a tombstone.
    pub fn to_tombstone(&self) -> Option<Tombstone> {
        self.deleted_at.map(|deleted_at| Tombstone {
            id: self.id,
            entity_type: self.entity_type,
            owner_id: self.owner_id.clone(),
            deleted_at,
            updated_at: self.updated_at,
        })
    }
}

/// A record as stored in the cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Record identifier.
    pub id: RecordId,
    /// Entity type.
    pub entity_type: EntityType,
    /// Owning user.
    pub owner_id: OwnerId,
    /// Canonical mutation time.
    pub updated_at: Timestamp,
    /// Tombstone time, if deleted.
    pub deleted_at: Option<Timestamp>,
    /// Entity-specific fields.
    pub payload: Payload,
}

impl RemoteRecord {
    /// Returns true if the cloud row is a tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A delete request for a record that has reached the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    /// Record identifier.
    pub id: RecordId,
    /// Entity type.
    pub entity_type: EntityType,
    /// Owning user.
    pub owner_id: OwnerId,
    /// Deletion time.
    pub deleted_at: Timestamp,
    /// Mutation time of the deletion.
    pub updated_at: Timestamp,
}

/// Per-record answer of the cloud to an upsert or delete batch.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordAck {
    /// The cloud stored the record with the given canonical timestamp.
    Applied {
        /// Record identifier.
        id: RecordId,
        /// Canonical `updated_at` assigned by the cloud.
        updated_at: Timestamp,
    },
    /// The cloud already holds a version at least as new; it is returned.
    Superseded {
        /// The cloud's current version.
        current: RemoteRecord,
    },
    /// The cloud refused the record permanently (validation failure).
    Rejected {
        /// Record identifier.
        id: RecordId,
        /// Reason given by the cloud.
        reason: String,
    },
}

impl RecordAck {
    /// Returns the record ID this acknowledgement refers to.
    pub fn id(&self) -> RecordId {
        match self {
            RecordAck::Applied { id, .. } | RecordAck::Rejected { id, .. } => *id,
            RecordAck::Superseded { current } => current.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerId {
        OwnerId::new("alice").unwrap()
    }

    #[test]
    fn new_record_is_dirty_and_unsynced() {
        let record = SyncableRecord::new(
            RecordId::new(),
            EntityType::WorkoutLog,
            owner(),
            Payload::default(),
            100,
        );
        assert_eq!(record.sync_state, SyncState::Dirty);
        assert!(!record.has_reached_cloud());
        assert!(!record.is_tombstone());
        assert!(record.to_tombstone().is_none());
    }

    #[test]
    fn from_remote_is_clean() {
        let remote = RemoteRecord {
            id: RecordId::new(),
            entity_type: EntityType::Set,
            owner_id: owner(),
            updated_at: 250,
            deleted_at: None,
            payload: Payload::from_bytes(vec![0xa0]),
        };
        let record = SyncableRecord::from_remote(remote.clone());
        assert_eq!(record.sync_state, SyncState::Clean);
        assert_eq!(record.last_synced_at, Some(250));
        assert_eq!(record.to_remote(), remote);
    }

    #[test]
    fn tombstone_carries_times() {
        let mut record = SyncableRecord::new(
            RecordId::new(),
            EntityType::Program,
            owner(),
            Payload::default(),
            10,
        );
        record.deleted_at = Some(20);
        record.updated_at = 20;

        let tombstone = record.to_tombstone().unwrap();
        assert_eq!(tombstone.id, record.id);
        assert_eq!(tombstone.deleted_at, 20);
        assert_eq!(tombstone.updated_at, 20);
    }

    #[test]
    fn pending_states() {
        assert!(!SyncState::Clean.is_pending());
        assert!(SyncState::Dirty.is_pending());
        assert!(SyncState::Pushing.is_pending());
    }

    #[test]
    fn ack_id() {
        let id = RecordId::new();
        let ack = RecordAck::Rejected {
            id,
            reason: "weight must be positive".into(),
        };
        assert_eq!(ack.id(), id);
    }
}
