//! Change tracking.
//!
//! Every state transition of a record goes through [`ChangeTracker`]: UI
//! writes mark records dirty, the push pipeline moves them through
//! `pushing` to `clean`, and the pull pipeline applies remote versions via
//! [`ChangeTracker::reconcile_remote`], which consults the conflict resolver
//! whenever the local copy has unacknowledged changes.

use crate::clock::next_timestamp;
use crate::error::{StoreError, StoreResult};
use crate::store::RecordStore;
use repsync_protocol::{
    Conflict, Entity, EntityType, OwnerId, Payload, ProtocolError, RecordId, RemoteRecord,
    Resolution, SyncState, SyncableRecord, Timestamp,
};
use std::sync::Arc;
use std::time::Duration;

/// What applying a remote record did to the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// No local copy existed; the remote record was inserted clean.
    Inserted,
    /// The clean local copy was replaced.
    Overwritten,
    /// The local copy had unacknowledged changes and lost.
    RemoteWon(Conflict),
    /// The local copy had unacknowledged changes and won; it stays dirty.
    LocalWon(Conflict),
    /// Both sides deleted the record; it is now a clean tombstone.
    TombstoneConverged,
    /// The remote version is not newer than what was last synced.
    Stale,
}

impl ApplyOutcome {
    /// Returns true if the local store now holds the remote version.
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            ApplyOutcome::Inserted
                | ApplyOutcome::Overwritten
                | ApplyOutcome::RemoteWon(_)
                | ApplyOutcome::TombstoneConverged
        )
    }

    /// Returns the conflict, if the outcome was a resolved divergence.
    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            ApplyOutcome::RemoteWon(conflict) | ApplyOutcome::LocalWon(conflict) => Some(conflict),
            _ => None,
        }
    }
}

/// Tracks local mutations and sync state transitions.
#[derive(Clone)]
pub struct ChangeTracker {
    store: Arc<RecordStore>,
}

impl ChangeTracker {
    /// Creates a tracker over a store.
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // UI writes
    // ------------------------------------------------------------------

    /// Creates a new dirty record with a fresh id.
    pub fn create(
        &self,
        owner_id: &OwnerId,
        entity_type: EntityType,
        payload: Payload,
    ) -> StoreResult<SyncableRecord> {
        self.create_with_id(RecordId::new(), owner_id, entity_type, payload)
    }

    /// Creates a new dirty record with a caller-chosen id.
    pub fn create_with_id(
        &self,
        id: RecordId,
        owner_id: &OwnerId,
        entity_type: EntityType,
        payload: Payload,
    ) -> StoreResult<SyncableRecord> {
        let updated_at = next_timestamp(self.store.clock(), None);
        let record = SyncableRecord::new(id, entity_type, owner_id.clone(), payload, updated_at);

        self.store.transaction(|txn| {
            if txn.get(&id).is_some() {
                return Err(StoreError::AlreadyExists(id));
            }
            txn.put(record.clone());
            Ok(())
        })?;

        tracing::debug!(id = %id, entity_type = %entity_type, "created record");
        Ok(record)
    }

    /// Creates a new record from a typed entity.
    pub fn create_entity<E: Entity>(
        &self,
        owner_id: &OwnerId,
        entity: &E,
    ) -> StoreResult<SyncableRecord> {
        self.create(owner_id, E::ENTITY_TYPE, entity.to_payload()?)
    }

    /// Replaces the payload of a live record and marks it dirty.
    ///
    /// Updating a record that is currently being uploaded is allowed; the
    /// record returns to `dirty` and the pending acknowledgement will not
    /// mark it clean.
    pub fn update(&self, id: &RecordId, payload: Payload) -> StoreResult<SyncableRecord> {
        self.mutate(id, |record| record.payload = payload)
    }

    /// Replaces the payload of a live record with a typed entity.
    pub fn update_entity<E: Entity>(&self, id: &RecordId, entity: &E) -> StoreResult<SyncableRecord> {
        let current = self.store.get(id).ok_or(StoreError::NotFound(*id))?;
        if current.entity_type != E::ENTITY_TYPE {
            return Err(ProtocolError::EntityMismatch {
                expected: current.entity_type.as_str(),
                found: E::ENTITY_TYPE.as_str(),
            }
            .into());
        }
        self.update(id, entity.to_payload()?)
    }

    /// Tombstones a live record.
    pub fn delete(&self, id: &RecordId) -> StoreResult<SyncableRecord> {
        self.mutate(id, |record| record.deleted_at = Some(record.updated_at))
    }

    /// Marks a live record dirty with a fresh `updated_at`.
    pub fn mark_dirty(&self, id: &RecordId) -> StoreResult<SyncableRecord> {
        self.mutate(id, |_| {})
    }

    fn mutate<F>(&self, id: &RecordId, f: F) -> StoreResult<SyncableRecord>
    where
        F: FnOnce(&mut SyncableRecord),
    {
        let clock = self.store.clock();
        self.store.transaction(|txn| {
            let mut record = txn
                .get(id)
                .filter(|r| !r.is_tombstone())
                .ok_or(StoreError::NotFound(*id))?;
            record.updated_at = next_timestamp(clock, Some(record.updated_at));
            record.sync_state = SyncState::Dirty;
            record.sync_error = None;
            f(&mut record);
            txn.put(record.clone());
            Ok(record)
        })
    }

    // ------------------------------------------------------------------
    // Push transitions
    // ------------------------------------------------------------------

    /// Returns every non-clean record of an owner, oldest first.
    pub fn pending_changes(&self, owner_id: &OwnerId) -> Vec<SyncableRecord> {
        let mut records = self.store.pending(owner_id);
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        records
    }

    /// Returns the number of non-clean records of an owner.
    pub fn pending_count(&self, owner_id: &OwnerId) -> usize {
        self.store.pending_count(owner_id)
    }

    /// Moves dirty records to `pushing` and returns the versions to upload.
    ///
    /// Records that are missing or no longer dirty are skipped.
    pub fn begin_push(&self, ids: &[RecordId]) -> StoreResult<Vec<SyncableRecord>> {
        self.store.transaction(|txn| {
            let mut started = Vec::with_capacity(ids.len());
            for id in ids {
                let Some(mut record) = txn.get(id) else {
                    continue;
                };
                if record.sync_state != SyncState::Dirty {
                    continue;
                }
                record.sync_state = SyncState::Pushing;
                record.in_flight_at = Some(record.updated_at);
                txn.put(record.clone());
                started.push(record);
            }
            Ok(started)
        })
    }

    /// Records that the cloud stored a pushed record.
    ///
    /// A record still in `pushing` becomes clean with `updated_at` set to
    /// the server's canonical value. A record mutated again while the upload
    /// was in flight stays dirty, moved past the server value if needed so
    /// it still wins against the version just stored. Returns true if the
    /// record became clean.
    pub fn acknowledge(&self, id: &RecordId, server_updated_at: Timestamp) -> StoreResult<bool> {
        self.store.transaction(|txn| {
            let Some(mut record) = txn.get(id) else {
                return Ok(false);
            };
            let sent = record.in_flight_at.take();

            match record.sync_state {
                SyncState::Pushing => {
                    record.sync_state = SyncState::Clean;
                    record.updated_at = server_updated_at;
                    record.last_synced_at = Some(server_updated_at);
                    record.sync_error = None;
                    txn.put(record);
                    Ok(true)
                }
                SyncState::Dirty if sent.is_some() => {
                    // The pending edit must still sort after the stored version.
                    if record.updated_at <= server_updated_at {
                        record.updated_at = server_updated_at.saturating_add(1);
                    }
                    record.last_synced_at = Some(server_updated_at);
                    txn.put(record);
                    Ok(false)
                }
                _ => Ok(false),
            }
        })
    }

    /// Returns an in-flight record to `dirty` after a failed upload.
    ///
    /// `reason` flags a permanent rejection; transient failures pass `None`.
    pub fn revert_to_dirty(&self, id: &RecordId, reason: Option<String>) -> StoreResult<()> {
        self.store.transaction(|txn| {
            let Some(mut record) = txn.get(id) else {
                return Ok(());
            };
            if record.sync_state == SyncState::Clean {
                return Ok(());
            }
            record.sync_state = SyncState::Dirty;
            record.in_flight_at = None;
            if reason.is_some() {
                record.sync_error = reason;
            }
            txn.put(record);
            Ok(())
        })
    }

    /// Physically removes a tombstone that never reached the cloud.
    ///
    /// Returns false, leaving the record alone, if it is not such a tombstone.
    pub fn drop_unsynced(&self, id: &RecordId) -> StoreResult<bool> {
        self.store.transaction(|txn| {
            match txn.get(id) {
                Some(record) if record.is_tombstone() && !record.has_reached_cloud() => {
                    txn.remove(id);
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    // ------------------------------------------------------------------
    // Pull transitions
    // ------------------------------------------------------------------

    /// Applies one remote record to the local store.
    pub fn reconcile_remote(&self, remote: RemoteRecord) -> StoreResult<ApplyOutcome> {
        self.store.transaction(|txn| {
            let Some(local) = txn.get(&remote.id) else {
                txn.put(SyncableRecord::from_remote(remote));
                return Ok(ApplyOutcome::Inserted);
            };

            if local
                .last_synced_at
                .is_some_and(|synced| remote.updated_at <= synced)
            {
                return Ok(ApplyOutcome::Stale);
            }

            let both_deleted = local.is_tombstone() && remote.is_tombstone();

            if local.sync_state == SyncState::Clean || both_deleted {
                txn.put(SyncableRecord::from_remote(remote));
                return Ok(if both_deleted {
                    ApplyOutcome::TombstoneConverged
                } else {
                    ApplyOutcome::Overwritten
                });
            }

            let conflict = Conflict::settle(&local, &remote);
            match conflict.resolution {
                Resolution::AcceptRemote => {
                    txn.put(SyncableRecord::from_remote(remote));
                    Ok(ApplyOutcome::RemoteWon(conflict))
                }
                Resolution::KeepLocal => {
                    let mut kept = local;
                    kept.last_synced_at = Some(remote.updated_at);
                    txn.put(kept);
                    Ok(ApplyOutcome::LocalWon(conflict))
                }
            }
        })
    }

    /// Purges clean tombstones of an owner deleted longer than `retention` ago.
    pub fn purge_expired(&self, owner_id: &OwnerId, retention: Duration) -> StoreResult<usize> {
        let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff = self.store.now().saturating_sub(retention_ms);
        let purged = self.store.purge_tombstones(owner_id, cutoff)?;
        if purged > 0 {
            tracing::debug!(owner = %owner_id, purged, "purged converged tombstones");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use repsync_protocol::models::WorkoutLog;

    fn setup() -> (ChangeTracker, Arc<ManualClock>, OwnerId) {
        let clock = Arc::new(ManualClock::new(100));
        let store = RecordStore::open_in_memory().with_clock(clock.clone());
        (
            ChangeTracker::new(Arc::new(store)),
            clock,
            OwnerId::new("alice").unwrap(),
        )
    }

    fn log(notes: &str) -> WorkoutLog {
        WorkoutLog {
            workout_type: "strength".into(),
            started_at: 0,
            duration_secs: 3600,
            notes: notes.into(),
        }
    }

    fn remote_of(record: &SyncableRecord, updated_at: Timestamp) -> RemoteRecord {
        let mut remote = record.to_remote();
        remote.updated_at = updated_at;
        remote
    }

    fn push_and_ack(tracker: &ChangeTracker, id: &RecordId) -> SyncableRecord {
        let started = tracker.begin_push(&[*id]).unwrap();
        assert!(tracker.acknowledge(id, started[0].updated_at).unwrap());
        tracker.store().get_any(id).unwrap()
    }

    #[test]
    fn create_is_dirty_and_pending() {
        let (tracker, _, owner) = setup();
        let record = tracker.create_entity(&owner, &log("first")).unwrap();

        assert_eq!(record.sync_state, SyncState::Dirty);
        assert_eq!(record.updated_at, 100);
        assert_eq!(tracker.pending_count(&owner), 1);
        assert_eq!(
            WorkoutLog::from_record(&tracker.store().get(&record.id).unwrap()).unwrap(),
            log("first")
        );
    }

    #[test]
    fn create_with_existing_id_fails() {
        let (tracker, _, owner) = setup();
        let record = tracker.create_entity(&owner, &log("a")).unwrap();
        let err = tracker
            .create_with_id(record.id, &owner, EntityType::WorkoutLog, Payload::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(id) if id == record.id));
    }

    #[test]
    fn update_advances_updated_at_under_frozen_clock() {
        let (tracker, _, owner) = setup();
        let record = tracker.create_entity(&owner, &log("a")).unwrap();
        let updated = tracker.update_entity(&record.id, &log("b")).unwrap();
        assert_eq!(updated.updated_at, 101);
    }

    #[test]
    fn update_entity_checks_type() {
        let (tracker, _, owner) = setup();
        let record = tracker
            .create(&owner, EntityType::Program, Payload::default())
            .unwrap();
        let err = tracker.update_entity(&record.id, &log("x")).unwrap_err();
        assert!(matches!(err, StoreError::Protocol(_)));
    }

    #[test]
    fn pending_changes_are_oldest_first() {
        let (tracker, clock, owner) = setup();
        let first = tracker.create_entity(&owner, &log("1")).unwrap();
        clock.advance(10);
        let second = tracker.create_entity(&owner, &log("2")).unwrap();
        clock.advance(10);
        tracker.update_entity(&first.id, &log("1b")).unwrap();

        let ids: Vec<_> = tracker
            .pending_changes(&owner)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn acknowledge_marks_clean_with_server_time() {
        let (tracker, _, owner) = setup();
        let record = tracker.create_entity(&owner, &log("a")).unwrap();

        tracker.begin_push(&[record.id]).unwrap();
        assert!(tracker.acknowledge(&record.id, 150).unwrap());

        let stored = tracker.store().get(&record.id).unwrap();
        assert_eq!(stored.sync_state, SyncState::Clean);
        assert_eq!(stored.updated_at, 150);
        assert_eq!(stored.last_synced_at, Some(150));
        assert_eq!(tracker.pending_count(&owner), 0);
    }

    #[test]
    fn acknowledge_keeps_edit_made_while_pushing() {
        let (tracker, clock, owner) = setup();
        let record = tracker.create_entity(&owner, &log("a")).unwrap();

        let started = tracker.begin_push(&[record.id]).unwrap();
        clock.advance(5);
        tracker.update_entity(&record.id, &log("edited")).unwrap();
        assert!(!tracker.acknowledge(&record.id, started[0].updated_at).unwrap());

        let stored = tracker.store().get(&record.id).unwrap();
        assert_eq!(stored.sync_state, SyncState::Dirty);
        assert_eq!(stored.updated_at, 105);
        assert_eq!(stored.last_synced_at, Some(100));
        assert_eq!(WorkoutLog::from_record(&stored).unwrap().notes, "edited");
    }

    #[test]
    fn edit_made_while_pushing_outranks_later_server_time() {
        let (tracker, clock, owner) = setup();
        let record = tracker.create_entity(&owner, &log("a")).unwrap();

        tracker.begin_push(&[record.id]).unwrap();
        clock.advance(5);
        tracker.update_entity(&record.id, &log("edited")).unwrap();
        assert!(!tracker.acknowledge(&record.id, 400).unwrap());

        let stored = tracker.store().get(&record.id).unwrap();
        assert_eq!(stored.sync_state, SyncState::Dirty);
        assert_eq!(stored.last_synced_at, Some(400));
        assert_eq!(stored.updated_at, 401);
    }

    #[test]
    fn revert_to_dirty_flags_rejection() {
        let (tracker, _, owner) = setup();
        let record = tracker.create_entity(&owner, &log("a")).unwrap();
        tracker.begin_push(&[record.id]).unwrap();
        tracker
            .revert_to_dirty(&record.id, Some("invalid weight".into()))
            .unwrap();

        let stored = tracker.store().get(&record.id).unwrap();
        assert_eq!(stored.sync_state, SyncState::Dirty);
        assert_eq!(stored.sync_error.as_deref(), Some("invalid weight"));
        assert_eq!(stored.in_flight_at, None);
    }

    #[test]
    fn unsynced_tombstone_is_dropped() {
        let (tracker, _, owner) = setup();
        let record = tracker.create_entity(&owner, &log("a")).unwrap();
        tracker.delete(&record.id).unwrap();

        assert!(tracker.drop_unsynced(&record.id).unwrap());
        assert!(tracker.store().get_any(&record.id).is_none());
        assert_eq!(tracker.pending_count(&owner), 0);
    }

    #[test]
    fn synced_tombstone_is_not_dropped() {
        let (tracker, _, owner) = setup();
        let record = tracker.create_entity(&owner, &log("a")).unwrap();
        push_and_ack(&tracker, &record.id);
        tracker.delete(&record.id).unwrap();

        assert!(!tracker.drop_unsynced(&record.id).unwrap());
        assert!(tracker.store().get_any(&record.id).unwrap().is_tombstone());
        assert!(tracker.store().get(&record.id).is_none());
    }

    #[test]
    fn delete_twice_is_not_found() {
        let (tracker, _, owner) = setup();
        let record = tracker.create_entity(&owner, &log("a")).unwrap();
        tracker.delete(&record.id).unwrap();
        assert!(matches!(
            tracker.delete(&record.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn reconcile_inserts_unknown_record() {
        let (tracker, _, owner) = setup();
        let remote = RemoteRecord {
            id: RecordId::new(),
            entity_type: EntityType::WorkoutLog,
            owner_id: owner.clone(),
            updated_at: 300,
            deleted_at: None,
            payload: log("remote").to_payload().unwrap(),
        };

        assert_eq!(
            tracker.reconcile_remote(remote.clone()).unwrap(),
            ApplyOutcome::Inserted
        );
        let stored = tracker.store().get(&remote.id).unwrap();
        assert_eq!(stored.sync_state, SyncState::Clean);
        assert_eq!(tracker.pending_count(&owner), 0);
    }

    #[test]
    fn reconcile_overwrites_clean_record() {
        let (tracker, _, owner) = setup();
        let record = tracker.create_entity(&owner, &log("a")).unwrap();
        let synced = push_and_ack(&tracker, &record.id);

        let outcome = tracker
            .reconcile_remote(remote_of(&synced, 200))
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Overwritten);
        assert_eq!(tracker.store().get(&record.id).unwrap().updated_at, 200);
    }

    #[test]
    fn reconcile_ignores_echo_of_own_push() {
        let (tracker, _, owner) = setup();
        let record = tracker.create_entity(&owner, &log("a")).unwrap();
        let synced = push_and_ack(&tracker, &record.id);

        let outcome = tracker
            .reconcile_remote(synced.to_remote())
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Stale);
        assert!(!outcome.is_applied());
    }

    #[test]
    fn newer_local_edit_survives_older_remote() {
        let (tracker, clock, owner) = setup();
        let record = tracker.create_entity(&owner, &log("a")).unwrap();
        let synced = push_and_ack(&tracker, &record.id);

        clock.set(500);
        tracker.update_entity(&record.id, &log("local")).unwrap();

        let outcome = tracker.reconcile_remote(remote_of(&synced, 300)).unwrap();
        assert!(matches!(outcome, ApplyOutcome::LocalWon(_)));

        let stored = tracker.store().get(&record.id).unwrap();
        assert_eq!(stored.sync_state, SyncState::Dirty);
        assert_eq!(stored.updated_at, 500);
        assert_eq!(stored.last_synced_at, Some(300));
        assert_eq!(WorkoutLog::from_record(&stored).unwrap().notes, "local");
    }

    #[test]
    fn newer_remote_wins_over_local_edit() {
        let (tracker, clock, owner) = setup();
        let record = tracker.create_entity(&owner, &log("a")).unwrap();
        let synced = push_and_ack(&tracker, &record.id);

        clock.set(200);
        tracker.update_entity(&record.id, &log("local")).unwrap();

        let mut remote = remote_of(&synced, 200);
        remote.payload = log("remote").to_payload().unwrap();
        let outcome = tracker.reconcile_remote(remote).unwrap();

        let conflict = outcome.conflict().unwrap();
        assert!(conflict.local_lost());
        let stored = tracker.store().get(&record.id).unwrap();
        assert_eq!(stored.sync_state, SyncState::Clean);
        assert_eq!(WorkoutLog::from_record(&stored).unwrap().notes, "remote");
    }

    #[test]
    fn both_sides_deleted_converges() {
        let (tracker, clock, owner) = setup();
        let record = tracker.create_entity(&owner, &log("a")).unwrap();
        let synced = push_and_ack(&tracker, &record.id);

        clock.set(400);
        tracker.delete(&record.id).unwrap();

        let mut remote = remote_of(&synced, 300);
        remote.deleted_at = Some(300);
        assert_eq!(
            tracker.reconcile_remote(remote).unwrap(),
            ApplyOutcome::TombstoneConverged
        );

        let stored = tracker.store().get_any(&record.id).unwrap();
        assert_eq!(stored.sync_state, SyncState::Clean);
        assert!(stored.is_tombstone());
        assert_eq!(tracker.pending_count(&owner), 0);
    }

    #[test]
    fn purge_expired_respects_retention() {
        let (tracker, clock, owner) = setup();
        let record = tracker.create_entity(&owner, &log("a")).unwrap();
        push_and_ack(&tracker, &record.id);
        tracker.delete(&record.id).unwrap();
        push_and_ack(&tracker, &record.id);

        let retention = Duration::from_secs(60);
        assert_eq!(tracker.purge_expired(&owner, retention).unwrap(), 0);

        clock.advance(61_000);
        assert_eq!(tracker.purge_expired(&owner, retention).unwrap(), 1);
        assert!(tracker.store().get_any(&record.id).is_none());
    }
}
