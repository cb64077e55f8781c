//! Pull half-cycle: apply records changed in the cloud.

use crate::cloud::{bounded, CloudStore};
use crate::config::SyncConfig;
use crate::error::SyncResult;
use repsync_protocol::{Conflict, EntityType, OwnerId, SyncWatermark, Timestamp};
use repsync_store::ChangeTracker;
use std::sync::Arc;

/// Outcome of a pull half-cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullResult {
    /// Remote records received.
    pub fetched: usize,
    /// Remote records that changed the local store.
    pub applied: usize,
    /// Divergences settled while applying.
    pub conflicts: Vec<Conflict>,
    /// Pull watermark after the half-cycle.
    pub watermark: Option<Timestamp>,
}

/// Fetches remote changes for every entity type and reconciles them locally.
pub struct PullPipeline {
    tracker: ChangeTracker,
    cloud: Arc<dyn CloudStore>,
    config: SyncConfig,
}

impl PullPipeline {
    /// Creates a pull pipeline.
    pub fn new(tracker: ChangeTracker, cloud: Arc<dyn CloudStore>, config: SyncConfig) -> Self {
        Self {
            tracker,
            cloud,
            config,
        }
    }

    /// Pulls every record of an owner changed since the pull watermark.
    ///
    /// All entity types are fetched before anything is applied, so a failed
    /// fetch leaves the store and the watermark untouched. The watermark
    /// then advances to the greatest `updated_at` received, capped at the
    /// cloud's latest change read before the first fetch. Rows written
    /// while the fetches run are picked up by the next pull.
    pub async fn pull(&self, owner_id: &OwnerId) -> SyncResult<PullResult> {
        let since = self
            .tracker
            .store()
            .watermark(owner_id)
            .and_then(|w| w.last_pulled_at);
        let cap = bounded(
            self.config.request_timeout,
            self.cloud.latest_change(owner_id),
        )
        .await?;

        let mut changed = Vec::new();
        for entity_type in EntityType::ALL {
            let records = bounded(
                self.config.request_timeout,
                self.cloud.fetch_changed_since(entity_type, owner_id, since),
            )
            .await?;
            tracing::debug!(
                owner = %owner_id,
                entity_type = %entity_type,
                records = records.len(),
                "fetched changes"
            );
            changed.extend(records);
        }

        let mut result = PullResult {
            fetched: changed.len(),
            watermark: since,
            ..PullResult::default()
        };

        let mut newest = None;
        for remote in changed {
            if &remote.owner_id != owner_id {
                tracing::warn!(id = %remote.id, "skipping record of another owner");
                continue;
            }
            newest = newest.max(Some(remote.updated_at));

            let outcome = self.tracker.reconcile_remote(remote)?;
            if outcome.is_applied() {
                result.applied += 1;
            }
            if let Some(conflict) = outcome.conflict() {
                result.conflicts.push(conflict.clone());
            }
        }

        self.tracker.store().transaction(|txn| {
            let mut watermark = txn
                .watermark(owner_id)
                .unwrap_or_else(|| SyncWatermark::new(owner_id.clone()));
            if let Some(newest) = newest.min(cap) {
                watermark.advance_pulled(newest);
            }
            result.watermark = watermark.last_pulled_at;
            txn.put_watermark(watermark);
            Ok(())
        })?;

        tracing::debug!(
            owner = %owner_id,
            fetched = result.fetched,
            applied = result.applied,
            conflicts = result.conflicts.len(),
            "pull finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::MemoryCloudStore;
    use crate::error::SyncError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use repsync_protocol::{Payload, RecordAck, RecordId, RemoteRecord, SyncState, Tombstone};
    use repsync_store::{ManualClock, RecordStore};

    /// A cloud where other devices write rows while set records are fetched.
    struct WritesDuringFetch {
        inner: Arc<MemoryCloudStore>,
        pending_writes: Mutex<Vec<RemoteRecord>>,
    }

    #[async_trait]
    impl CloudStore for WritesDuringFetch {
        async fn latest_change(&self, owner_id: &OwnerId) -> SyncResult<Option<Timestamp>> {
            self.inner.latest_change(owner_id).await
        }

        async fn fetch_changed_since(
            &self,
            entity_type: EntityType,
            owner_id: &OwnerId,
            since: Option<Timestamp>,
        ) -> SyncResult<Vec<RemoteRecord>> {
            if entity_type == EntityType::Set {
                let writes = std::mem::take(&mut *self.pending_writes.lock());
                for record in writes {
                    self.inner
                        .upsert_batch(record.entity_type, vec![record])
                        .await?;
                }
            }
            self.inner
                .fetch_changed_since(entity_type, owner_id, since)
                .await
        }

        async fn upsert_batch(
            &self,
            entity_type: EntityType,
            records: Vec<RemoteRecord>,
        ) -> SyncResult<Vec<RecordAck>> {
            self.inner.upsert_batch(entity_type, records).await
        }

        async fn delete_batch(
            &self,
            entity_type: EntityType,
            tombstones: Vec<Tombstone>,
        ) -> SyncResult<Vec<RecordAck>> {
            self.inner.delete_batch(entity_type, tombstones).await
        }
    }

    fn setup() -> (ChangeTracker, Arc<MemoryCloudStore>, PullPipeline, OwnerId) {
        let clock = Arc::new(ManualClock::new(1_000));
        let tracker = ChangeTracker::new(Arc::new(RecordStore::open_in_memory().with_clock(clock)));
        let cloud = Arc::new(MemoryCloudStore::new());
        let pipeline = PullPipeline::new(tracker.clone(), cloud.clone(), SyncConfig::new());
        (tracker, cloud, pipeline, OwnerId::new("alice").unwrap())
    }

    fn remote(owner_id: &OwnerId, entity_type: EntityType, updated_at: Timestamp) -> RemoteRecord {
        RemoteRecord {
            id: RecordId::new(),
            entity_type,
            owner_id: owner_id.clone(),
            updated_at,
            deleted_at: None,
            payload: Payload::from_bytes(vec![0xa0]),
        }
    }

    #[tokio::test]
    async fn pulls_every_entity_type_and_advances_to_max() {
        let (tracker, cloud, pipeline, owner) = setup();
        cloud.put_remote(remote(&owner, EntityType::WorkoutLog, 300)).unwrap();
        cloud.put_remote(remote(&owner, EntityType::ScheduledWorkout, 700)).unwrap();
        cloud.put_remote(remote(&owner, EntityType::Set, 500)).unwrap();

        let result = pipeline.pull(&owner).await.unwrap();

        assert_eq!(cloud.fetch_calls(), EntityType::ALL.len());
        assert_eq!(result.applied, 3);
        assert_eq!(result.watermark, Some(700));
        assert_eq!(tracker.store().len(), 3);
        assert_eq!(tracker.pending_count(&owner), 0);
        assert_eq!(
            tracker.store().watermark(&owner).unwrap().last_pulled_at,
            Some(700)
        );
    }

    #[tokio::test]
    async fn second_pull_is_empty() {
        let (_, cloud, pipeline, owner) = setup();
        cloud.put_remote(remote(&owner, EntityType::Program, 300)).unwrap();

        pipeline.pull(&owner).await.unwrap();
        let second = pipeline.pull(&owner).await.unwrap();

        assert_eq!(second.fetched, 0);
        assert_eq!(second.applied, 0);
        assert_eq!(second.watermark, Some(300));
    }

    #[tokio::test]
    async fn empty_cloud_creates_watermark() {
        let (tracker, _, pipeline, owner) = setup();
        let result = pipeline.pull(&owner).await.unwrap();

        assert_eq!(result.watermark, None);
        assert!(tracker.store().watermark(&owner).is_some());
    }

    #[tokio::test]
    async fn failed_fetch_applies_nothing() {
        let (tracker, cloud, pipeline, owner) = setup();
        cloud.put_remote(remote(&owner, EntityType::WorkoutLog, 300)).unwrap();
        cloud.set_online(false);

        let err = pipeline.pull(&owner).await.unwrap_err();
        assert!(matches!(err, SyncError::Unreachable));
        assert!(tracker.store().is_empty());
        assert!(tracker.store().watermark(&owner).is_none());
    }

    #[tokio::test]
    async fn local_dirty_edit_is_protected() {
        let (tracker, cloud, pipeline, owner) = setup();
        let local = tracker
            .create(&owner, EntityType::WorkoutLog, Payload::from_bytes(vec![0x01]))
            .unwrap();

        let mut older = local.to_remote();
        older.updated_at = 500;
        older.payload = Payload::from_bytes(vec![0x02]);
        cloud.put_remote(older).unwrap();

        let result = pipeline.pull(&owner).await.unwrap();

        assert_eq!(result.applied, 0);
        assert_eq!(result.conflicts.len(), 1);
        assert!(!result.conflicts[0].local_lost());
        let stored = tracker.store().get(&local.id).unwrap();
        assert_eq!(stored.sync_state, SyncState::Dirty);
        assert_eq!(stored.payload, Payload::from_bytes(vec![0x01]));
    }

    #[tokio::test]
    async fn rows_written_during_pull_are_not_skipped() {
        let (tracker, cloud, _, owner) = setup();
        cloud.put_remote(remote(&owner, EntityType::Program, 300)).unwrap();
        let late_log = remote(&owner, EntityType::WorkoutLog, 50);
        let late_schedule = remote(&owner, EntityType::ScheduledWorkout, 60);
        let racing = Arc::new(WritesDuringFetch {
            inner: cloud.clone(),
            pending_writes: Mutex::new(vec![late_log.clone(), late_schedule.clone()]),
        });
        let pipeline = PullPipeline::new(tracker.clone(), racing, SyncConfig::new());

        let first = pipeline.pull(&owner).await.unwrap();
        assert_eq!(cloud.get(&late_log.id).unwrap().updated_at, 301);
        assert_eq!(cloud.get(&late_schedule.id).unwrap().updated_at, 302);
        assert_eq!(first.applied, 2);
        assert!(tracker.store().get(&late_log.id).is_none());
        assert_eq!(first.watermark, Some(300));

        let second = pipeline.pull(&owner).await.unwrap();
        assert_eq!(second.applied, 1);
        assert!(tracker.store().get(&late_log.id).is_some());
        assert_eq!(second.watermark, Some(302));
    }
}
