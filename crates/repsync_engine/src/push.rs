//! Push half-cycle: upload locally dirty records.

use crate::cloud::{bounded, CloudStore};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use repsync_protocol::{
    Conflict, EntityType, OwnerId, RecordAck, RecordId, RemoteRecord, SyncWatermark,
    SyncableRecord, Timestamp,
};
use repsync_store::ChangeTracker;
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of a push half-cycle.
#[derive(Debug, Default)]
pub struct PushResult {
    /// Records the cloud acknowledged.
    pub uploaded: usize,
    /// Records left dirty by a failed batch or a rejection.
    pub failed: Vec<RecordId>,
    /// Records the cloud rejected permanently.
    pub rejected: usize,
    /// Tombstones removed locally because they never reached the cloud.
    pub dropped: usize,
    /// Uploads the cloud refused because it already held a newer version.
    pub conflicts: Vec<Conflict>,
    /// Greatest acknowledged `updated_at`.
    pub last_acked_at: Option<Timestamp>,
    /// First batch failure, if any batch failed.
    pub error: Option<SyncError>,
}

impl PushResult {
    fn record_ack(&mut self, updated_at: Timestamp) {
        self.uploaded += 1;
        self.last_acked_at = Some(self.last_acked_at.map_or(updated_at, |t| t.max(updated_at)));
    }
}

/// Uploads dirty records in bounded batches, one entity type at a time.
pub struct PushPipeline {
    tracker: ChangeTracker,
    cloud: Arc<dyn CloudStore>,
    config: SyncConfig,
}

impl PushPipeline {
    /// Creates a push pipeline.
    pub fn new(tracker: ChangeTracker, cloud: Arc<dyn CloudStore>, config: SyncConfig) -> Self {
        Self {
            tracker,
            cloud,
            config,
        }
    }

    /// Uploads every pending record of an owner.
    ///
    /// A failing batch reverts its records to dirty and is reported in
    /// [`PushResult::error`]; the remaining batches are still attempted.
    /// `Err` is returned only for local store failures. The push watermark
    /// advances only when every batch went through.
    pub async fn push(&self, owner_id: &OwnerId) -> SyncResult<PushResult> {
        let mut result = PushResult::default();

        let pending = self.tracker.pending_changes(owner_id);
        if pending.is_empty() {
            tracing::debug!(owner = %owner_id, "nothing to push");
            return Ok(result);
        }

        let mut to_send = Vec::with_capacity(pending.len());
        for record in pending {
            if record.is_tombstone() && !record.has_reached_cloud() {
                if self.tracker.drop_unsynced(&record.id)? {
                    result.dropped += 1;
                }
            } else {
                to_send.push(record.id);
            }
        }

        let started = self.tracker.begin_push(&to_send)?;
        if let Err(e) = self.push_batches(owner_id, &started, &mut result).await {
            for record in &started {
                if let Err(revert) = self.tracker.revert_to_dirty(&record.id, None) {
                    tracing::warn!(id = %record.id, error = %revert, "failed to revert record");
                }
            }
            return Err(e);
        }

        if result.error.is_none() {
            if let Some(acked) = result.last_acked_at {
                self.tracker.store().transaction(|txn| {
                    let mut watermark = txn
                        .watermark(owner_id)
                        .unwrap_or_else(|| SyncWatermark::new(owner_id.clone()));
                    watermark.advance_pushed(acked);
                    txn.put_watermark(watermark);
                    Ok(())
                })?;
            }
        }

        tracing::debug!(
            owner = %owner_id,
            uploaded = result.uploaded,
            failed = result.failed.len(),
            dropped = result.dropped,
            "push finished"
        );
        Ok(result)
    }

    async fn push_batches(
        &self,
        owner_id: &OwnerId,
        started: &[SyncableRecord],
        result: &mut PushResult,
    ) -> SyncResult<()> {
        let batch_size = self.config.push_batch_size.max(1);

        for entity_type in EntityType::ALL {
            let (deletes, upserts): (Vec<&SyncableRecord>, Vec<&SyncableRecord>) = started
                .iter()
                .filter(|r| r.entity_type == entity_type)
                .partition(|r| r.is_tombstone());

            for batch in upserts.chunks(batch_size) {
                tracing::debug!(
                    owner = %owner_id,
                    entity_type = %entity_type,
                    records = batch.len(),
                    "uploading batch"
                );
                let records = batch.iter().map(|r| r.to_remote()).collect();
                let acks = bounded(
                    self.config.request_timeout,
                    self.cloud.upsert_batch(entity_type, records),
                )
                .await;
                self.settle(entity_type, batch, acks, result)?;
            }

            for batch in deletes.chunks(batch_size) {
                tracing::debug!(
                    owner = %owner_id,
                    entity_type = %entity_type,
                    records = batch.len(),
                    "deleting batch"
                );
                let tombstones = batch.iter().filter_map(|r| r.to_tombstone()).collect();
                let acks = bounded(
                    self.config.request_timeout,
                    self.cloud.delete_batch(entity_type, tombstones),
                )
                .await;
                self.settle(entity_type, batch, acks, result)?;
            }
        }

        Ok(())
    }

    fn settle(
        &self,
        entity_type: EntityType,
        batch: &[&SyncableRecord],
        acks: SyncResult<Vec<RecordAck>>,
        result: &mut PushResult,
    ) -> SyncResult<()> {
        let acks = match acks {
            Ok(acks) => acks,
            Err(e) => {
                tracing::warn!(
                    entity_type = %entity_type,
                    records = batch.len(),
                    error = %e,
                    "batch failed"
                );
                for record in batch {
                    self.tracker.revert_to_dirty(&record.id, None)?;
                    result.failed.push(record.id);
                }
                result.error.get_or_insert(e);
                return Ok(());
            }
        };

        let mut settled = HashSet::with_capacity(batch.len());
        for ack in acks {
            let id = ack.id();
            let Some(sent) = batch.iter().find(|r| r.id == id) else {
                tracing::warn!(id = %id, "ack for a record that was not sent");
                continue;
            };
            if !settled.insert(id) {
                continue;
            }

            match ack {
                RecordAck::Applied { updated_at, .. } => {
                    self.tracker.acknowledge(&id, updated_at)?;
                    result.record_ack(updated_at);
                }
                RecordAck::Superseded { current } if holds_sent_version(sent, &current) => {
                    // An earlier upload of this exact version landed but its ack was lost.
                    self.tracker.acknowledge(&id, current.updated_at)?;
                    result.record_ack(current.updated_at);
                }
                RecordAck::Superseded { current } => {
                    self.tracker.revert_to_dirty(&id, None)?;
                    let outcome = self.tracker.reconcile_remote(current)?;
                    if let Some(conflict) = outcome.conflict() {
                        result.conflicts.push(conflict.clone());
                    }
                }
                RecordAck::Rejected { reason, .. } => {
                    tracing::warn!(id = %id, reason = %reason, "record rejected");
                    self.tracker.revert_to_dirty(&id, Some(reason))?;
                    result.failed.push(id);
                    result.rejected += 1;
                }
            }
        }

        for record in batch {
            if !settled.contains(&record.id) {
                tracing::warn!(id = %record.id, "no ack for record");
                self.tracker.revert_to_dirty(&record.id, None)?;
                result.failed.push(record.id);
            }
        }

        Ok(())
    }
}

/// True if the cloud row carries the same content as `sent`, stored at or
/// after the time it was sent.
fn holds_sent_version(sent: &SyncableRecord, current: &RemoteRecord) -> bool {
    current.updated_at >= sent.updated_at
        && current.owner_id == sent.owner_id
        && current.entity_type == sent.entity_type
        && current.deleted_at == sent.deleted_at
        && current.payload == sent.payload
}
