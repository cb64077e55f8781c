//! Test fixtures: devices sharing a cloud, and record builders.

use repsync_engine::{CloudStore, MemoryCloudStore, StaticSession, SyncConfig, SyncCycleResult, SyncEngine};
use repsync_protocol::models::WorkoutLog;
use repsync_protocol::{
    Entity, EntityType, OwnerId, RecordId, RemoteRecord, SyncableRecord, Timestamp,
};
use repsync_store::{ChangeTracker, ManualClock, RecordStore};
use std::sync::Arc;
use tempfile::TempDir;

/// Creates an owner id.
///
/// # Panics
///
/// Panics if `name` is blank.
pub fn owner(name: &str) -> OwnerId {
    OwnerId::new(name).expect("owner name must not be blank")
}

/// Creates an empty in-memory cloud to share between devices.
pub fn shared_cloud() -> Arc<MemoryCloudStore> {
    Arc::new(MemoryCloudStore::new())
}

/// Builds a workout log with the given notes.
pub fn workout_log(notes: &str) -> WorkoutLog {
    WorkoutLog {
        workout_type: "strength".into(),
        started_at: 0,
        duration_secs: 3_600,
        notes: notes.into(),
    }
}

/// Builds a cloud row holding a workout log, as another device would write it.
pub fn remote_workout_log(
    owner_id: &OwnerId,
    id: RecordId,
    updated_at: Timestamp,
    notes: &str,
) -> RemoteRecord {
    RemoteRecord {
        id,
        entity_type: EntityType::WorkoutLog,
        owner_id: owner_id.clone(),
        updated_at,
        deleted_at: None,
        payload: workout_log(notes)
            .to_payload()
            .expect("workout log encodes"),
    }
}

/// A simulated device: its own store and clock, syncing against a shared cloud.
pub struct TestDevice {
    /// The device clock, frozen until moved.
    pub clock: Arc<ManualClock>,
    /// The device's local store.
    pub store: Arc<RecordStore>,
    /// The device's sync engine.
    pub engine: SyncEngine,
    /// The signed-in owner.
    pub owner: OwnerId,
    _temp_dir: Option<TempDir>,
}

impl TestDevice {
    /// Creates a device with an in-memory store and default configuration.
    pub fn new(cloud: &Arc<MemoryCloudStore>, owner_id: &OwnerId, start: Timestamp) -> Self {
        Self::with_config(cloud, owner_id, start, SyncConfig::default())
    }

    /// Creates a device with an in-memory store.
    pub fn with_config(
        cloud: &Arc<MemoryCloudStore>,
        owner_id: &OwnerId,
        start: Timestamp,
        config: SyncConfig,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(RecordStore::open_in_memory().with_clock(clock.clone()));
        Self::assemble(cloud, owner_id, clock, store, config, None)
    }

    /// Creates a device whose store is persisted in a temporary directory.
    pub fn file(cloud: &Arc<MemoryCloudStore>, owner_id: &OwnerId, start: Timestamp) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let clock = Arc::new(ManualClock::new(start));
        let store = RecordStore::open(temp_dir.path().join("records.cbor"))
            .expect("failed to open file store")
            .with_clock(clock.clone());
        Self::assemble(
            cloud,
            owner_id,
            clock,
            Arc::new(store),
            SyncConfig::default(),
            Some(temp_dir),
        )
    }

    fn assemble(
        cloud: &Arc<MemoryCloudStore>,
        owner_id: &OwnerId,
        clock: Arc<ManualClock>,
        store: Arc<RecordStore>,
        config: SyncConfig,
        temp_dir: Option<TempDir>,
    ) -> Self {
        let cloud: Arc<dyn CloudStore> = cloud.clone();
        let engine = SyncEngine::new(
            Arc::clone(&store),
            cloud,
            Arc::new(StaticSession::new(owner_id.clone())),
            config,
        );
        Self {
            clock,
            store,
            engine,
            owner: owner_id.clone(),
            _temp_dir: temp_dir,
        }
    }

    /// Returns the device's change tracker.
    pub fn tracker(&self) -> &ChangeTracker {
        self.engine.tracker()
    }

    /// Runs one sync cycle for the device owner.
    pub async fn sync(&self) -> SyncCycleResult {
        self.engine.sync_now(&self.owner).await
    }

    /// Returns the number of records waiting for upload.
    pub fn pending(&self) -> usize {
        self.tracker().pending_count(&self.owner)
    }

    /// Logs a workout at the current device time.
    pub fn log_workout(&self, notes: &str) -> SyncableRecord {
        self.tracker()
            .create_entity(&self.owner, &workout_log(notes))
            .expect("failed to create workout log")
    }

    /// Replaces the notes of a workout log at the current device time.
    pub fn edit_notes(&self, id: &RecordId, notes: &str) -> SyncableRecord {
        self.tracker()
            .update_entity(id, &workout_log(notes))
            .expect("failed to update workout log")
    }

    /// Returns the notes of a live workout log.
    pub fn notes(&self, id: &RecordId) -> Option<String> {
        let record = self.store.get(id)?;
        WorkoutLog::from_record(&record).ok().map(|log| log.notes)
    }
}

impl std::ops::Deref for TestDevice {
    type Target = SyncEngine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}
