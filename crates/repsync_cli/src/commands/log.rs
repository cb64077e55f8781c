//! Log command implementation.

use super::open_tracker;
use repsync_protocol::models::WorkoutLog;
use repsync_protocol::OwnerId;
use std::path::Path;
use tracing::info;

/// Runs the log command.
pub fn run(
    path: &Path,
    owner: &OwnerId,
    workout_type: String,
    duration_secs: u32,
    notes: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let tracker = open_tracker(path)?;
    let log = WorkoutLog {
        workout_type,
        started_at: tracker.store().now(),
        duration_secs,
        notes,
    };
    let record = tracker.create_entity(owner, &log)?;
    info!(id = %record.id, owner = %owner, "workout logged");

    println!("{}", record.id);
    Ok(())
}
