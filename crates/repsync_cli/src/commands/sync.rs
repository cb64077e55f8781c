//! Sync command implementation.
//!
//! Runs a single cycle against a cloud kept in a local CBOR file, which is
//! enough to move records between two stores on one machine.

use repsync_engine::{MemoryCloudStore, StaticSession, SyncConfig, SyncCycleResult, SyncEngine};
use repsync_protocol::{Conflict, OwnerId, Timestamp};
use repsync_store::RecordStore;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Outcome of one CLI sync cycle.
#[derive(Debug, Serialize)]
pub struct SyncReport {
    /// Owner the cycle ran for.
    pub owner: String,
    /// Records the cloud acknowledged.
    pub uploaded: usize,
    /// Remote records applied locally.
    pub applied: usize,
    /// Records left pending after a failed upload.
    pub failed: Vec<String>,
    /// Tombstones purged.
    pub purged: usize,
    /// Conflicts settled during the cycle.
    pub conflicts: Vec<ConflictView>,
    /// Elapsed time in milliseconds.
    pub duration_ms: u128,
    /// First failure of the cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A settled conflict.
#[derive(Debug, Serialize)]
pub struct ConflictView {
    /// Record id.
    pub id: String,
    /// Entity type name.
    pub entity_type: &'static str,
    /// Local modification time.
    pub local_updated_at: Timestamp,
    /// Cloud modification time.
    pub remote_updated_at: Timestamp,
    /// Surviving side, "local" or "remote".
    pub winner: &'static str,
}

impl From<&Conflict> for ConflictView {
    fn from(conflict: &Conflict) -> Self {
        Self {
            id: conflict.id.to_string(),
            entity_type: conflict.entity_type.as_str(),
            local_updated_at: conflict.local_updated_at,
            remote_updated_at: conflict.remote_updated_at,
            winner: if conflict.local_lost() { "remote" } else { "local" },
        }
    }
}

impl From<SyncCycleResult> for SyncReport {
    fn from(result: SyncCycleResult) -> Self {
        Self {
            owner: result.owner_id.to_string(),
            uploaded: result.uploaded,
            applied: result.applied,
            failed: result.failed.iter().map(ToString::to_string).collect(),
            purged: result.purged,
            conflicts: result.conflicts.iter().map(ConflictView::from).collect(),
            duration_ms: result.duration.as_millis(),
            error: result.error,
        }
    }
}

/// Runs one cycle and returns its report.
pub fn execute(
    path: &Path,
    owner: &OwnerId,
    cloud_path: &Path,
    full: bool,
) -> Result<SyncReport, Box<dyn std::error::Error>> {
    let store = Arc::new(RecordStore::open(path)?);
    let cloud = Arc::new(MemoryCloudStore::open(cloud_path)?);
    let engine = SyncEngine::new(
        store,
        cloud,
        Arc::new(StaticSession::new(owner.clone())),
        SyncConfig::default(),
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(async {
        if full {
            engine.full_resync(owner).await
        } else {
            engine.sync_now(owner).await
        }
    });

    Ok(SyncReport::from(result))
}

/// Runs the sync command. Exits with an error when the cycle failed.
pub fn run(
    path: &Path,
    owner: &OwnerId,
    cloud_path: &Path,
    full: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = execute(path, owner, cloud_path, full)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => print_text_output(&report),
    }

    match report.error {
        Some(error) => Err(format!("sync failed: {error}").into()),
        None => Ok(()),
    }
}

fn print_text_output(report: &SyncReport) {
    println!("Sync for {} ({} ms)", report.owner, report.duration_ms);
    println!("  Uploaded: {}", report.uploaded);
    println!("  Applied:  {}", report.applied);
    println!("  Purged:   {}", report.purged);

    for conflict in &report.conflicts {
        println!(
            "  Conflict {} ({}): local {} vs remote {}, {} wins",
            conflict.id,
            conflict.entity_type,
            conflict.local_updated_at,
            conflict.remote_updated_at,
            conflict.winner
        );
    }
    for id in &report.failed {
        println!("  Failed:   {id}");
    }
}
