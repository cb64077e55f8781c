//! Cloud store client abstraction.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use repsync_protocol::{
    EntityType, OwnerId, Payload, RecordAck, RecordId, RemoteRecord, Timestamp, Tombstone,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

/// Client of the cloud store holding every device's records.
///
/// Implementations are expected to scope every call to the record owner
/// server-side and to keep deletes as soft-deleted rows so other devices
/// can pull them.
///
/// The `updated_at` of a stored row is assigned by the cloud and increases
/// with every write, whatever the writing device's clock says. It is
/// returned in [`RecordAck::Applied`] and is what `fetch_changed_since`
/// compares against.
#[async_trait]
pub trait CloudStore: Send + Sync {
    /// Returns the greatest `updated_at` among the owner's rows.
    ///
    /// Read before fetching so that rows written during a multi-type pull
    /// are not skipped by the next one.
    async fn latest_change(&self, owner_id: &OwnerId) -> SyncResult<Option<Timestamp>>;

    /// Fetches records of one type changed strictly after `since`.
    ///
    /// `None` fetches everything the owner has, tombstones included.
    async fn fetch_changed_since(
        &self,
        entity_type: EntityType,
        owner_id: &OwnerId,
        since: Option<Timestamp>,
    ) -> SyncResult<Vec<RemoteRecord>>;

    /// Creates or updates records of one type; returns one ack per record.
    async fn upsert_batch(
        &self,
        entity_type: EntityType,
        records: Vec<RemoteRecord>,
    ) -> SyncResult<Vec<RecordAck>>;

    /// Soft-deletes records of one type; returns one ack per tombstone.
    async fn delete_batch(
        &self,
        entity_type: EntityType,
        tombstones: Vec<Tombstone>,
    ) -> SyncResult<Vec<RecordAck>>;
}

const CLOUD_FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct CloudSnapshotOut<'a> {
    format_version: u32,
    records: Vec<&'a RemoteRecord>,
}

#[derive(Deserialize)]
struct CloudSnapshotIn {
    format_version: u32,
    records: Vec<RemoteRecord>,
}

/// An in-memory cloud store.
///
/// Applies last-writer-wins server-side: a write is stored only if it is
/// strictly newer than the current row, otherwise the current row is
/// returned as [`RecordAck::Superseded`]. Rows owned by another user are
/// never overwritten. Accepted writes are stamped with
/// `max(sent, last_stamp + 1)`.
///
/// Faults can be injected for testing, and the store can be backed by a
/// CBOR file that is rewritten after every mutation.
#[derive(Debug, Default)]
pub struct MemoryCloudStore {
    rows: RwLock<BTreeMap<RecordId, RemoteRecord>>,
    last_stamp: AtomicI64,
    path: Option<PathBuf>,
    offline: AtomicBool,
    failures: AtomicUsize,
    rejections: RwLock<HashMap<RecordId, String>>,
    latency: Mutex<Duration>,
    fetch_calls: AtomicUsize,
    upsert_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MemoryCloudStore {
    /// Creates an empty in-memory cloud.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a file-backed cloud, creating an empty one if the file is missing.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut rows = BTreeMap::new();

        if path.exists() {
            let reader = BufReader::new(File::open(&path).map_err(io_error)?);
            let snapshot: CloudSnapshotIn = ciborium::de::from_reader(reader)
                .map_err(|e| SyncError::ServerError(format!("corrupt cloud file: {e}")))?;
            if snapshot.format_version != CLOUD_FORMAT_VERSION {
                return Err(SyncError::ServerError(format!(
                    "unsupported cloud file version {}",
                    snapshot.format_version
                )));
            }
            for record in snapshot.records {
                rows.insert(record.id, record);
            }
        }

        tracing::debug!(path = %path.display(), rows = rows.len(), "opened cloud file");

        let last_stamp = rows.values().map(|r| r.updated_at).max().unwrap_or(0);
        Ok(Self {
            rows: RwLock::new(rows),
            last_stamp: AtomicI64::new(last_stamp),
            path: Some(path),
            ..Self::default()
        })
    }

    /// Assigns the stored timestamp of an accepted write.
    ///
    /// Callers hold the rows write lock, so stamps never repeat.
    fn stamp(&self, sent: Timestamp) -> Timestamp {
        let next = sent.max(self.last_stamp.load(Ordering::SeqCst).saturating_add(1));
        self.last_stamp.store(next, Ordering::SeqCst);
        next
    }

    fn persist(&self, rows: &BTreeMap<RecordId, RemoteRecord>) -> SyncResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let snapshot = CloudSnapshotOut {
            format_version: CLOUD_FORMAT_VERSION,
            records: rows.values().collect(),
        };

        let mut tmp_name = OsString::from(path.as_os_str());
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut writer = BufWriter::new(File::create(&tmp_path).map_err(io_error)?);
        ciborium::ser::into_writer(&snapshot, &mut writer)
            .map_err(|e| SyncError::ServerError(e.to_string()))?;
        writer.flush().map_err(io_error)?;
        fs::rename(&tmp_path, path).map_err(io_error)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    /// Switches the cloud between reachable and unreachable.
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    /// Returns true if the cloud is reachable.
    pub fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    /// Makes the next `count` calls fail with a retryable transport error.
    pub fn fail_next_calls(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Makes every write of `id` fail with a permanent rejection.
    pub fn reject_record(&self, id: RecordId, reason: impl Into<String>) {
        self.rejections.write().insert(id, reason.into());
    }

    /// Accepts previously rejected records again.
    pub fn clear_rejections(&self) {
        self.rejections.write().clear();
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    async fn gate(&self) -> SyncResult<()> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.is_online() {
            return Err(SyncError::Unreachable);
        }
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SyncError::transport_retryable("injected failure"));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inspection and direct edits
    // ------------------------------------------------------------------

    /// Number of fetch calls received.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of upsert calls received.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Number of delete calls received.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Gets a row by id, tombstones included.
    pub fn get(&self, id: &RecordId) -> Option<RemoteRecord> {
        self.rows.read().get(id).cloned()
    }

    /// Returns every row of an owner, tombstones included.
    pub fn records_for(&self, owner_id: &OwnerId) -> Vec<RemoteRecord> {
        self.rows
            .read()
            .values()
            .filter(|r| &r.owner_id == owner_id)
            .cloned()
            .collect()
    }

    /// Returns the number of live rows of an owner.
    pub fn live_count(&self, owner_id: &OwnerId) -> usize {
        self.rows
            .read()
            .values()
            .filter(|r| &r.owner_id == owner_id && !r.is_tombstone())
            .count()
    }

    /// Returns the total number of rows.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if the cloud holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Writes a row directly, bypassing last-writer-wins.
    ///
    /// Simulates an edit made by another device or by the backend itself.
    /// The row keeps its `updated_at` as given.
    pub fn put_remote(&self, record: RemoteRecord) -> SyncResult<()> {
        let mut rows = self.rows.write();
        self.last_stamp.fetch_max(record.updated_at, Ordering::SeqCst);
        rows.insert(record.id, record);
        self.persist(&rows)
    }

    fn check_write(
        &self,
        rows: &BTreeMap<RecordId, RemoteRecord>,
        id: &RecordId,
        entity_type: EntityType,
        expected_type: EntityType,
        owner_id: &OwnerId,
        updated_at: Timestamp,
    ) -> Option<RecordAck> {
        if let Some(reason) = self.rejections.read().get(id) {
            return Some(RecordAck::Rejected {
                id: *id,
                reason: reason.clone(),
            });
        }
        if entity_type != expected_type {
            return Some(RecordAck::Rejected {
                id: *id,
                reason: format!("expected {expected_type}, got {entity_type}"),
            });
        }
        let current = rows.get(id)?;
        if &current.owner_id != owner_id {
            return Some(RecordAck::Rejected {
                id: *id,
                reason: "record belongs to another owner".into(),
            });
        }
        if current.updated_at >= updated_at {
            return Some(RecordAck::Superseded {
                current: current.clone(),
            });
        }
        None
    }
}

#[async_trait]
impl CloudStore for MemoryCloudStore {
    async fn latest_change(&self, owner_id: &OwnerId) -> SyncResult<Option<Timestamp>> {
        self.gate().await?;
        Ok(self
            .rows
            .read()
            .values()
            .filter(|r| &r.owner_id == owner_id)
            .map(|r| r.updated_at)
            .max())
    }

    async fn fetch_changed_since(
        &self,
        entity_type: EntityType,
        owner_id: &OwnerId,
        since: Option<Timestamp>,
    ) -> SyncResult<Vec<RemoteRecord>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;

        let mut changed: Vec<RemoteRecord> = self
            .rows
            .read()
            .values()
            .filter(|r| r.entity_type == entity_type && &r.owner_id == owner_id)
            .filter(|r| since.map_or(true, |since| r.updated_at > since))
            .cloned()
            .collect();
        changed.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        Ok(changed)
    }

    async fn upsert_batch(
        &self,
        entity_type: EntityType,
        records: Vec<RemoteRecord>,
    ) -> SyncResult<Vec<RecordAck>> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;

        let mut rows = self.rows.write();
        let mut acks = Vec::with_capacity(records.len());
        for mut record in records {
            if let Some(ack) = self.check_write(
                &rows,
                &record.id,
                record.entity_type,
                entity_type,
                &record.owner_id,
                record.updated_at,
            ) {
                acks.push(ack);
                continue;
            }
            record.updated_at = self.stamp(record.updated_at);
            acks.push(RecordAck::Applied {
                id: record.id,
                updated_at: record.updated_at,
            });
            rows.insert(record.id, record);
        }
        self.persist(&rows)?;
        Ok(acks)
    }

    async fn delete_batch(
        &self,
        entity_type: EntityType,
        tombstones: Vec<Tombstone>,
    ) -> SyncResult<Vec<RecordAck>> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;

        let mut rows = self.rows.write();
        let mut acks = Vec::with_capacity(tombstones.len());
        for tombstone in tombstones {
            if let Some(ack) = self.check_write(
                &rows,
                &tombstone.id,
                tombstone.entity_type,
                entity_type,
                &tombstone.owner_id,
                tombstone.updated_at,
            ) {
                acks.push(ack);
                continue;
            }
            let updated_at = self.stamp(tombstone.updated_at);
            let row = rows.entry(tombstone.id).or_insert_with(|| RemoteRecord {
                id: tombstone.id,
                entity_type: tombstone.entity_type,
                owner_id: tombstone.owner_id.clone(),
                updated_at: tombstone.updated_at,
                deleted_at: None,
                payload: Payload::default(),
            });
            row.updated_at = updated_at;
            row.deleted_at = Some(tombstone.deleted_at);
            acks.push(RecordAck::Applied {
                id: tombstone.id,
                updated_at,
            });
        }
        self.persist(&rows)?;
        Ok(acks)
    }
}

/// Awaits a cloud call, failing with [`SyncError::Timeout`] after `timeout`.
pub(crate) async fn bounded<T, F>(timeout: Duration, call: F) -> SyncResult<T>
where
    F: std::future::Future<Output = SyncResult<T>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| SyncError::Timeout)?
}

fn io_error(e: std::io::Error) -> SyncError {
    SyncError::ServerError(e.to_string())
}
