//! Cycle results, status and statistics.

use repsync_protocol::{Conflict, OwnerId, RecordId, Timestamp};
use std::time::Duration;

/// Outcome of one sync cycle.
///
/// A cycle never fails as a whole: transport and store failures are
/// described by `error` while the counters report what did succeed.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncCycleResult {
    /// Owner the cycle ran for.
    pub owner_id: OwnerId,
    /// Records the cloud acknowledged.
    pub uploaded: usize,
    /// Remote records applied to the local store.
    pub applied: usize,
    /// Divergences settled by last-writer-wins.
    pub conflicts: Vec<Conflict>,
    /// Records still dirty because their upload failed.
    pub failed: Vec<RecordId>,
    /// Tombstones removed after the retention window.
    pub purged: usize,
    /// First failure of the cycle.
    pub error: Option<String>,
    /// Whether this caller joined a cycle started by another caller.
    pub joined: bool,
    /// Wall time spent in the cycle.
    pub duration: Duration,
}

impl SyncCycleResult {
    pub(crate) fn new(owner_id: OwnerId) -> Self {
        Self {
            owner_id,
            uploaded: 0,
            applied: 0,
            conflicts: Vec::new(),
            failed: Vec::new(),
            purged: 0,
            error: None,
            joined: false,
            duration: Duration::ZERO,
        }
    }

    pub(crate) fn aborted(owner_id: OwnerId) -> Self {
        Self {
            error: Some("sync cycle aborted".into()),
            ..Self::new(owner_id)
        }
    }

    /// Returns true if the cycle finished without any failure.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.failed.is_empty()
    }
}

/// Snapshot of sync state for UI indicators.
///
/// Recomputed on every call; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncCycleStatus {
    /// A cycle is in flight for the owner.
    pub is_syncing: bool,
    /// Records with changes the cloud has not acknowledged.
    pub pending_local_count: usize,
    /// Error of the most recent cycle, cleared by a clean cycle.
    pub last_error: Option<String>,
    /// Store time of the most recent clean cycle.
    pub last_success_at: Option<Timestamp>,
}

/// Cumulative statistics across cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Cycles run, joined callers excluded.
    pub cycles_completed: u64,
    /// Cycles that reported an error.
    pub cycles_failed: u64,
    /// Callers that joined an in-flight cycle.
    pub cycles_joined: u64,
    /// Records uploaded.
    pub records_uploaded: u64,
    /// Remote records applied.
    pub records_applied: u64,
    /// Conflicts settled.
    pub conflicts_resolved: u64,
}

impl SyncStats {
    pub(crate) fn record(&mut self, result: &SyncCycleResult) {
        self.cycles_completed += 1;
        if result.error.is_some() {
            self.cycles_failed += 1;
        }
        self.records_uploaded += result.uploaded as u64;
        self.records_applied += result.applied as u64;
        self.conflicts_resolved += result.conflicts.len() as u64;
    }
}
