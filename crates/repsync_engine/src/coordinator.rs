//! Sync cycle coordination.

use crate::cloud::CloudStore;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::pull::PullPipeline;
use crate::push::PushPipeline;
use crate::session::SessionProvider;
use crate::status::{SyncCycleResult, SyncCycleStatus, SyncStats};
use parking_lot::{Mutex, RwLock};
use repsync_protocol::{OwnerId, Timestamp};
use repsync_store::ChangeTracker;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

type InFlight = HashMap<OwnerId, watch::Receiver<Option<SyncCycleResult>>>;

#[derive(Debug, Default, Clone)]
struct OwnerHistory {
    last_error: Option<String>,
    last_success_at: Option<Timestamp>,
}

enum Claim {
    Lead(watch::Sender<Option<SyncCycleResult>>),
    Join(watch::Receiver<Option<SyncCycleResult>>),
}

/// Releases an owner's in-flight slot when the leading cycle ends,
/// including when its future is dropped mid-cycle.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<InFlight>,
    owner_id: OwnerId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.owner_id);
    }
}

/// Runs sync cycles, at most one per owner at a time.
///
/// A cycle authorizes the owner against the session, pushes, pulls, then
/// purges converged tombstones. A caller arriving while a cycle for the same
/// owner is in flight waits for that cycle and receives its result with
/// [`SyncCycleResult::joined`] set.
pub struct SyncCoordinator {
    tracker: ChangeTracker,
    session: Arc<dyn SessionProvider>,
    config: SyncConfig,
    push: PushPipeline,
    pull: PullPipeline,
    in_flight: Mutex<InFlight>,
    history: RwLock<HashMap<OwnerId, OwnerHistory>>,
    stats: RwLock<SyncStats>,
}

impl SyncCoordinator {
    /// Creates a coordinator.
    pub fn new(
        tracker: ChangeTracker,
        cloud: Arc<dyn CloudStore>,
        session: Arc<dyn SessionProvider>,
        config: SyncConfig,
    ) -> Self {
        Self {
            push: PushPipeline::new(tracker.clone(), Arc::clone(&cloud), config.clone()),
            pull: PullPipeline::new(tracker.clone(), cloud, config.clone()),
            tracker,
            session,
            config,
            in_flight: Mutex::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Returns the change tracker.
    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the session provider.
    pub fn session(&self) -> &Arc<dyn SessionProvider> {
        &self.session
    }

    /// Runs one push-then-pull cycle for `owner_id`, or joins the one in flight.
    pub async fn sync_now(&self, owner_id: &OwnerId) -> SyncCycleResult {
        self.run_claimed(owner_id, false).await
    }

    /// Forgets the pull watermark and runs a cycle that refetches everything.
    ///
    /// The reset happens inside the claimed cycle, so it never races another
    /// cycle's watermark update. A caller that joins an in-flight cycle gets
    /// that cycle's result without a reset.
    pub async fn full_resync(&self, owner_id: &OwnerId) -> SyncCycleResult {
        self.run_claimed(owner_id, true).await
    }

    async fn run_claimed(&self, owner_id: &OwnerId, reset: bool) -> SyncCycleResult {
        let claim = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(owner_id) {
                Some(receiver) => Claim::Join(receiver.clone()),
                None => {
                    let (sender, receiver) = watch::channel(None);
                    in_flight.insert(owner_id.clone(), receiver);
                    Claim::Lead(sender)
                }
            }
        };

        match claim {
            Claim::Join(receiver) => self.join(owner_id, receiver).await,
            Claim::Lead(sender) => {
                let guard = InFlightGuard {
                    in_flight: &self.in_flight,
                    owner_id: owner_id.clone(),
                };
                let result = self.run_cycle(owner_id, reset).await;
                // Release the slot first: a caller arriving after this point
                // must start its own cycle, not join a finished one.
                drop(guard);
                sender.send_replace(Some(result.clone()));
                result
            }
        }
    }

    async fn join(
        &self,
        owner_id: &OwnerId,
        mut receiver: watch::Receiver<Option<SyncCycleResult>>,
    ) -> SyncCycleResult {
        tracing::debug!(owner = %owner_id, "joining in-flight cycle");
        self.stats.write().cycles_joined += 1;

        let finished = match receiver.wait_for(Option::is_some).await {
            Ok(result) => (*result).clone(),
            Err(_) => None,
        };
        match finished {
            Some(mut result) => {
                result.joined = true;
                result
            }
            None => SyncCycleResult::aborted(owner_id.clone()),
        }
    }

    async fn run_cycle(&self, owner_id: &OwnerId, reset: bool) -> SyncCycleResult {
        let started = Instant::now();
        let mut result = SyncCycleResult::new(owner_id.clone());
        let mut first_error: Option<SyncError> = None;

        match self.session.current_owner() {
            Ok(current) if &current == owner_id => {
                if reset {
                    if let Err(e) = self.tracker.store().reset_watermark(owner_id) {
                        first_error = Some(e.into());
                    }
                }
                if first_error.is_none() {
                    self.push_then_pull(owner_id, &mut result, &mut first_error)
                        .await;
                }
            }
            Ok(current) => {
                first_error = Some(SyncError::AuthenticationFailed(format!(
                    "signed in as {current}, cannot sync {owner_id}"
                )));
            }
            Err(e) => first_error = Some(e),
        }

        result.error = first_error.map(|e| e.to_string());
        result.duration = started.elapsed();
        self.finish(&result);
        result
    }

    async fn push_then_pull(
        &self,
        owner_id: &OwnerId,
        result: &mut SyncCycleResult,
        first_error: &mut Option<SyncError>,
    ) {
        match self.push.push(owner_id).await {
            Ok(push) => {
                result.uploaded = push.uploaded;
                result.failed = push.failed;
                result.conflicts.extend(push.conflicts);
                if let Some(e) = push.error {
                    tracing::warn!(owner = %owner_id, error = %e, "push half-cycle failed");
                    first_error.get_or_insert(e);
                }
            }
            Err(e) => {
                tracing::warn!(owner = %owner_id, error = %e, "push half-cycle failed");
                first_error.get_or_insert(e);
            }
        }

        match self.pull.pull(owner_id).await {
            Ok(pull) => {
                result.applied = pull.applied;
                result.conflicts.extend(pull.conflicts);
                match self
                    .tracker
                    .purge_expired(owner_id, self.config.tombstone_retention)
                {
                    Ok(purged) => result.purged = purged,
                    Err(e) => tracing::warn!(owner = %owner_id, error = %e, "tombstone purge failed"),
                }
            }
            Err(e) => {
                tracing::warn!(owner = %owner_id, error = %e, "pull half-cycle failed");
                first_error.get_or_insert(e);
            }
        }
    }

    fn finish(&self, result: &SyncCycleResult) {
        {
            let mut history = self.history.write();
            let entry = history.entry(result.owner_id.clone()).or_default();
            match (&result.error, result.failed.len()) {
                (Some(error), _) => entry.last_error = Some(error.clone()),
                (None, 0) => {
                    entry.last_error = None;
                    entry.last_success_at = Some(self.tracker.store().now());
                }
                (None, failed) => {
                    entry.last_error = Some(format!("{failed} record(s) failed to upload"));
                }
            }
        }
        self.stats.write().record(result);

        tracing::info!(
            owner = %result.owner_id,
            uploaded = result.uploaded,
            applied = result.applied,
            conflicts = result.conflicts.len(),
            failed = result.failed.len(),
            error = result.error.as_deref().unwrap_or(""),
            duration_ms = result.duration.as_millis() as u64,
            "sync cycle finished"
        );
    }

    /// Returns true if a cycle for `owner_id` is in flight.
    pub fn is_syncing(&self, owner_id: &OwnerId) -> bool {
        self.in_flight.lock().contains_key(owner_id)
    }

    /// Computes the current status of an owner.
    pub fn status_for(&self, owner_id: &OwnerId) -> SyncCycleStatus {
        let history = self
            .history
            .read()
            .get(owner_id)
            .cloned()
            .unwrap_or_default();
        SyncCycleStatus {
            is_syncing: self.is_syncing(owner_id),
            pending_local_count: self.tracker.pending_count(owner_id),
            last_error: history.last_error,
            last_success_at: history.last_success_at,
        }
    }

    /// Returns cumulative statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }
}
