//! Periodic background sync.

use crate::coordinator::SyncCoordinator;
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use repsync_protocol::OwnerId;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

struct Schedule {
    owner_id: OwnerId,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Drives periodic sync cycles for one owner at a time.
///
/// Only one schedule exists per scheduler. Starting it for the owner it
/// already runs for does nothing; starting it for another owner replaces
/// the running schedule. Stopping cancels future ticks but lets a cycle
/// that is already running finish.
#[derive(Default)]
pub struct SyncScheduler {
    current: Mutex<Option<Schedule>>,
}

impl SyncScheduler {
    /// Creates an idle scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts periodic cycles for `owner_id`; the first runs immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        &self,
        coordinator: Arc<SyncCoordinator>,
        owner_id: &OwnerId,
        interval: Duration,
    ) -> SyncResult<()> {
        let handle = Handle::try_current().map_err(|e| SyncError::Runtime(e.to_string()))?;

        let mut current = self.current.lock();
        if let Some(schedule) = current.as_ref() {
            if &schedule.owner_id == owner_id && !schedule.task.is_finished() {
                return Ok(());
            }
        }
        if let Some(previous) = current.take() {
            tracing::info!(owner = %previous.owner_id, "replacing background sync");
            previous.stop.send_replace(true);
        }

        let (stop, stop_rx) = watch::channel(false);
        let task = handle.spawn(run_schedule(coordinator, owner_id.clone(), interval, stop_rx));
        tracing::info!(owner = %owner_id, interval_ms = interval.as_millis() as u64, "started background sync");

        *current = Some(Schedule {
            owner_id: owner_id.clone(),
            stop,
            task,
        });
        Ok(())
    }

    /// Stops the schedule. Returns false if none was running.
    pub fn stop(&self) -> bool {
        match self.current.lock().take() {
            Some(schedule) => {
                schedule.stop.send_replace(true);
                tracing::info!(owner = %schedule.owner_id, "stopped background sync");
                true
            }
            None => false,
        }
    }

    /// Returns the owner of the running schedule.
    pub fn owner(&self) -> Option<OwnerId> {
        self.current
            .lock()
            .as_ref()
            .filter(|s| !s.task.is_finished())
            .map(|s| s.owner_id.clone())
    }

    /// Returns true if a schedule is running.
    pub fn is_running(&self) -> bool {
        self.owner().is_some()
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_schedule(
    coordinator: Arc<SyncCoordinator>,
    owner_id: OwnerId,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }
        if *stop.borrow() {
            break;
        }

        let result = coordinator.sync_now(&owner_id).await;
        if let Some(error) = &result.error {
            tracing::warn!(owner = %owner_id, error = %error, "background sync failed");
        }
    }

    tracing::debug!(owner = %owner_id, "background sync loop exited");
}
