//! Embedded record store.
//!
//! Records live in memory behind a single lock. File-backed stores write a
//! CBOR snapshot after every committed transaction: the snapshot goes to a
//! sibling temp file which is then renamed over the previous one, so a crash
//! leaves either the old or the new state on disk.

use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use repsync_protocol::{
    EntityType, OwnerId, RecordId, SyncState, SyncWatermark, SyncableRecord, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Snapshot format version written by this build.
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotOut<'a> {
    format_version: u32,
    records: Vec<&'a SyncableRecord>,
    watermarks: Vec<&'a SyncWatermark>,
}

#[derive(Deserialize)]
struct SnapshotIn {
    format_version: u32,
    records: Vec<SyncableRecord>,
    watermarks: Vec<SyncWatermark>,
}

#[derive(Default)]
struct StoreState {
    records: BTreeMap<RecordId, SyncableRecord>,
    /// Non-clean record ids per owner.
    pending: BTreeMap<OwnerId, BTreeSet<RecordId>>,
    watermarks: BTreeMap<OwnerId, SyncWatermark>,
}

impl StoreState {
    fn insert(&mut self, record: SyncableRecord) -> Option<SyncableRecord> {
        let previous = self.remove(&record.id);
        if record.sync_state.is_pending() {
            self.pending
                .entry(record.owner_id.clone())
                .or_default()
                .insert(record.id);
        }
        self.records.insert(record.id, record);
        previous
    }

    fn remove(&mut self, id: &RecordId) -> Option<SyncableRecord> {
        let previous = self.records.remove(id)?;
        if let Some(ids) = self.pending.get_mut(&previous.owner_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.pending.remove(&previous.owner_id);
            }
        }
        Some(previous)
    }

    fn set_watermark(
        &mut self,
        owner_id: OwnerId,
        watermark: Option<SyncWatermark>,
    ) -> Option<SyncWatermark> {
        match watermark {
            Some(watermark) => self.watermarks.insert(owner_id, watermark),
            None => self.watermarks.remove(&owner_id),
        }
    }
}

/// A buffered set of writes against the store.
///
/// Reads see the transaction's own writes. Nothing is visible to other
/// readers until the closure passed to [`RecordStore::transaction`] returns
/// `Ok`.
pub struct Transaction<'a> {
    base: &'a StoreState,
    writes: BTreeMap<RecordId, Option<SyncableRecord>>,
    watermark_writes: BTreeMap<OwnerId, Option<SyncWatermark>>,
}

impl<'a> Transaction<'a> {
    fn new(base: &'a StoreState) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
            watermark_writes: BTreeMap::new(),
        }
    }

    /// Gets a record by id, tombstones included.
    pub fn get(&self, id: &RecordId) -> Option<SyncableRecord> {
        match self.writes.get(id) {
            Some(write) => write.clone(),
            None => self.base.records.get(id).cloned(),
        }
    }

    /// Inserts or replaces a record.
    pub fn put(&mut self, record: SyncableRecord) {
        self.writes.insert(record.id, Some(record));
    }

    /// Physically removes a record. Returns true if it existed.
    pub fn remove(&mut self, id: &RecordId) -> bool {
        let existed = self.get(id).is_some();
        self.writes.insert(*id, None);
        existed
    }

    /// Gets the watermark of an owner.
    pub fn watermark(&self, owner_id: &OwnerId) -> Option<SyncWatermark> {
        match self.watermark_writes.get(owner_id) {
            Some(write) => write.clone(),
            None => self.base.watermarks.get(owner_id).cloned(),
        }
    }

    /// Stores the watermark of an owner.
    pub fn put_watermark(&mut self, watermark: SyncWatermark) {
        self.watermark_writes
            .insert(watermark.owner_id.clone(), Some(watermark));
    }

    /// Deletes the watermark of an owner.
    pub fn clear_watermark(&mut self, owner_id: &OwnerId) {
        self.watermark_writes.insert(owner_id.clone(), None);
    }
}

/// Local store of synced records and per-owner watermarks.
///
/// # Example
///
/// ```
/// use repsync_protocol::{EntityType, OwnerId, Payload, RecordId, SyncableRecord};
/// use repsync_store::RecordStore;
///
/// let store = RecordStore::open_in_memory();
/// let owner = OwnerId::new("alice").unwrap();
/// let record = SyncableRecord::new(
///     RecordId::new(),
///     EntityType::WorkoutLog,
///     owner.clone(),
///     Payload::default(),
///     100,
/// );
/// let id = record.id;
///
/// store.transaction(|txn| {
///     txn.put(record);
///     Ok(())
/// }).unwrap();
///
/// assert!(store.get(&id).is_some());
/// assert_eq!(store.pending_count(&owner), 1);
/// ```
pub struct RecordStore {
    state: RwLock<StoreState>,
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl RecordStore {
    /// Opens a store that lives only in memory.
    pub fn open_in_memory() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            path: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Opens a file-backed store, creating it if it doesn't exist.
    ///
    /// Records left in the `Pushing` state by an interrupted upload are
    /// reverted to `Dirty` so the next cycle uploads them again.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let state = if path.exists() {
            Self::load(&path)?
        } else {
            StoreState::default()
        };

        tracing::debug!(
            path = %path.display(),
            records = state.records.len(),
            "opened record store"
        );

        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the clock used to stamp mutations.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the clock used to stamp mutations.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Returns the current time according to the store's clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Returns the snapshot path, or `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn load(path: &Path) -> StoreResult<StoreState> {
        let reader = BufReader::new(File::open(path)?);
        let snapshot: SnapshotIn =
            ciborium::de::from_reader(reader).map_err(|e| StoreError::InvalidFormat {
                message: e.to_string(),
            })?;

        if snapshot.format_version != SNAPSHOT_VERSION {
            return Err(StoreError::InvalidFormat {
                message: format!("unsupported snapshot version {}", snapshot.format_version),
            });
        }

        let mut state = StoreState::default();
        let mut interrupted = 0usize;
        for mut record in snapshot.records {
            if record.sync_state == SyncState::Pushing {
                record.sync_state = SyncState::Dirty;
                record.in_flight_at = None;
                interrupted += 1;
            }
            state.insert(record);
        }
        for watermark in snapshot.watermarks {
            state
                .watermarks
                .insert(watermark.owner_id.clone(), watermark);
        }

        if interrupted > 0 {
            tracing::warn!(interrupted, "reverted interrupted uploads to dirty");
        }

        Ok(state)
    }

    fn persist(&self, state: &StoreState) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let snapshot = SnapshotOut {
            format_version: SNAPSHOT_VERSION,
            records: state.records.values().collect(),
            watermarks: state.watermarks.values().collect(),
        };

        let mut tmp_name = OsString::from(path.as_os_str());
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        ciborium::ser::into_writer(&snapshot, &mut writer)
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Runs `f` as a single atomic transaction.
    ///
    /// The store is locked for the duration of `f`; `f` must not call back
    /// into the store. If `f` returns an error, none of its writes are
    /// applied. If persisting the snapshot fails, the in-memory state is
    /// rolled back and the error returned.
    pub fn transaction<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> StoreResult<T>,
    {
        let mut state = self.state.write();

        let (value, writes, watermark_writes) = {
            let mut txn = Transaction::new(&state);
            let value = f(&mut txn)?;
            (value, txn.writes, txn.watermark_writes)
        };

        if writes.is_empty() && watermark_writes.is_empty() {
            return Ok(value);
        }

        let mut undo = Vec::with_capacity(writes.len());
        for (id, write) in writes {
            let previous = match write {
                Some(record) => state.insert(record),
                None => state.remove(&id),
            };
            undo.push((id, previous));
        }

        let mut undo_watermarks = Vec::with_capacity(watermark_writes.len());
        for (owner_id, watermark) in watermark_writes {
            let previous = state.set_watermark(owner_id.clone(), watermark);
            undo_watermarks.push((owner_id, previous));
        }

        if let Err(e) = self.persist(&state) {
            for (id, previous) in undo.into_iter().rev() {
                match previous {
                    Some(record) => {
                        state.insert(record);
                    }
                    None => {
                        state.remove(&id);
                    }
                }
            }
            for (owner_id, previous) in undo_watermarks.into_iter().rev() {
                state.set_watermark(owner_id, previous);
            }
            return Err(e);
        }

        Ok(value)
    }

    /// Gets a live (non-tombstoned) record.
    pub fn get(&self, id: &RecordId) -> Option<SyncableRecord> {
        self.state
            .read()
            .records
            .get(id)
            .filter(|record| !record.is_tombstone())
            .cloned()
    }

    /// Gets a record including tombstones.
    pub fn get_any(&self, id: &RecordId) -> Option<SyncableRecord> {
        self.state.read().records.get(id).cloned()
    }

    /// Lists live records of one entity type for an owner, newest first.
    pub fn list(&self, owner_id: &OwnerId, entity_type: EntityType) -> Vec<SyncableRecord> {
        let state = self.state.read();
        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|r| &r.owner_id == owner_id && r.entity_type == entity_type)
            .filter(|r| !r.is_tombstone())
            .cloned()
            .collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        records
    }

    /// Returns every record of an owner, tombstones included.
    pub fn records_for(&self, owner_id: &OwnerId) -> Vec<SyncableRecord> {
        self.state
            .read()
            .records
            .values()
            .filter(|r| &r.owner_id == owner_id)
            .cloned()
            .collect()
    }

    /// Returns all non-clean records of an owner, in id order.
    pub fn pending(&self, owner_id: &OwnerId) -> Vec<SyncableRecord> {
        let state = self.state.read();
        state
            .pending
            .get(owner_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.records.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the ids of all non-clean records of an owner.
    pub fn pending_ids(&self, owner_id: &OwnerId) -> Vec<RecordId> {
        self.state
            .read()
            .pending
            .get(owner_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the number of non-clean records of an owner.
    pub fn pending_count(&self, owner_id: &OwnerId) -> usize {
        self.state
            .read()
            .pending
            .get(owner_id)
            .map_or(0, BTreeSet::len)
    }

    /// Returns the tombstoned records of an owner.
    pub fn tombstones(&self, owner_id: &OwnerId) -> Vec<SyncableRecord> {
        self.state
            .read()
            .records
            .values()
            .filter(|r| &r.owner_id == owner_id && r.is_tombstone())
            .cloned()
            .collect()
    }

    /// Gets the watermark of an owner, if a sync ever ran.
    pub fn watermark(&self, owner_id: &OwnerId) -> Option<SyncWatermark> {
        self.state.read().watermarks.get(owner_id).cloned()
    }

    /// Forgets an owner's watermark so the next pull starts from scratch.
    pub fn reset_watermark(&self, owner_id: &OwnerId) -> StoreResult<()> {
        self.transaction(|txn| {
            txn.clear_watermark(owner_id);
            Ok(())
        })
    }

    /// Physically removes clean tombstones deleted before `cutoff`.
    ///
    /// Returns the number of records removed.
    pub fn purge_tombstones(&self, owner_id: &OwnerId, cutoff: Timestamp) -> StoreResult<usize> {
        let candidates: Vec<RecordId> = self
            .tombstones(owner_id)
            .into_iter()
            .filter(|r| is_purgeable(r, cutoff))
            .map(|r| r.id)
            .collect();

        if candidates.is_empty() {
            return Ok(0);
        }

        self.transaction(|txn| {
            let mut purged = 0;
            for id in &candidates {
                if txn.get(id).is_some_and(|r| is_purgeable(&r, cutoff)) {
                    txn.remove(id);
                    purged += 1;
                }
            }
            Ok(purged)
        })
    }

    /// Returns the total number of records, tombstones included.
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }
}

fn is_purgeable(record: &SyncableRecord, cutoff: Timestamp) -> bool {
    record.sync_state == SyncState::Clean && record.deleted_at.is_some_and(|t| t < cutoff)
}
