//! Delete command implementation.

use super::open_tracker;
use repsync_protocol::RecordId;
use std::path::Path;
use tracing::info;

/// Runs the delete command. The record becomes a tombstone until synced.
pub fn run(path: &Path, id: &RecordId) -> Result<(), Box<dyn std::error::Error>> {
    let tracker = open_tracker(path)?;
    let record = tracker.delete(id)?;
    info!(id = %id, deleted_at = ?record.deleted_at, "record deleted");

    println!("Deleted {} ({})", id, record.entity_type);
    Ok(())
}
