//! The sync engine facade used by the UI layer.

use crate::cloud::CloudStore;
use crate::config::SyncConfig;
use crate::coordinator::SyncCoordinator;
use crate::error::SyncResult;
use crate::scheduler::SyncScheduler;
use crate::session::SessionProvider;
use crate::status::{SyncCycleResult, SyncCycleStatus, SyncStats};
use repsync_protocol::OwnerId;
use repsync_store::{ChangeTracker, RecordStore};
use std::sync::Arc;

/// Keeps the local record store and the cloud in agreement.
///
/// # Example
///
/// ```
/// use repsync_engine::{MemoryCloudStore, StaticSession, SyncConfig, SyncEngine};
/// use repsync_protocol::{models::WorkoutLog, OwnerId};
/// use repsync_store::RecordStore;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let owner = OwnerId::new("alice").unwrap();
/// let cloud = Arc::new(MemoryCloudStore::new());
/// let engine = SyncEngine::new(
///     Arc::new(RecordStore::open_in_memory()),
///     cloud.clone(),
///     Arc::new(StaticSession::new(owner.clone())),
///     SyncConfig::default(),
/// );
///
/// let log = WorkoutLog {
///     workout_type: "run".into(),
///     started_at: 0,
///     duration_secs: 1800,
///     notes: String::new(),
/// };
/// engine.tracker().create_entity(&owner, &log).unwrap();
/// assert_eq!(engine.sync_status().pending_local_count, 1);
///
/// let result = engine.sync_now(&owner).await;
/// assert_eq!(result.uploaded, 1);
/// assert_eq!(cloud.live_count(&owner), 1);
/// # }
/// ```
pub struct SyncEngine {
    coordinator: Arc<SyncCoordinator>,
    scheduler: SyncScheduler,
}

impl SyncEngine {
    /// Creates an engine over a store, a cloud and a session.
    pub fn new(
        store: Arc<RecordStore>,
        cloud: Arc<dyn CloudStore>,
        session: Arc<dyn SessionProvider>,
        config: SyncConfig,
    ) -> Self {
        let tracker = ChangeTracker::new(store);
        Self {
            coordinator: Arc::new(SyncCoordinator::new(tracker, cloud, session, config)),
            scheduler: SyncScheduler::new(),
        }
    }

    /// Returns the change tracker through which the UI mutates records.
    pub fn tracker(&self) -> &ChangeTracker {
        self.coordinator.tracker()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        self.coordinator.config()
    }

    /// Runs one sync cycle for `owner_id`. Never fails; see the result's `error`.
    pub async fn sync_now(&self, owner_id: &OwnerId) -> SyncCycleResult {
        self.coordinator.sync_now(owner_id).await
    }

    /// Rolls back the pull watermark and resynchronizes from scratch.
    pub async fn full_resync(&self, owner_id: &OwnerId) -> SyncCycleResult {
        self.coordinator.full_resync(owner_id).await
    }

    /// Starts periodic cycles for `owner_id` at the configured interval.
    ///
    /// Replaces a schedule running for another owner.
    pub fn start_background_sync(&self, owner_id: &OwnerId) -> SyncResult<()> {
        self.scheduler.start(
            Arc::clone(&self.coordinator),
            owner_id,
            self.coordinator.config().sync_interval,
        )
    }

    /// Stops periodic cycles. Safe to call when none are running.
    pub fn stop_background_sync(&self) {
        self.scheduler.stop();
    }

    /// Returns the owner background sync runs for.
    pub fn background_owner(&self) -> Option<OwnerId> {
        self.scheduler.owner()
    }

    /// Returns the status of the signed-in owner.
    ///
    /// With nobody signed in, the status carries the authentication error.
    pub fn sync_status(&self) -> SyncCycleStatus {
        match self.coordinator.session().current_owner() {
            Ok(owner_id) => self.coordinator.status_for(&owner_id),
            Err(e) => SyncCycleStatus {
                last_error: Some(e.to_string()),
                ..SyncCycleStatus::default()
            },
        }
    }

    /// Returns the status of a specific owner.
    pub fn status_for(&self, owner_id: &OwnerId) -> SyncCycleStatus {
        self.coordinator.status_for(owner_id)
    }

    /// Returns cumulative statistics.
    pub fn stats(&self) -> SyncStats {
        self.coordinator.stats()
    }
}
