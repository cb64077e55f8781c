//! Purge command implementation.

use super::open_tracker;
use repsync_protocol::OwnerId;
use std::path::Path;
use std::time::Duration;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Runs the purge command.
pub fn run(path: &Path, owner: &OwnerId, retention_days: u64) -> Result<(), Box<dyn std::error::Error>> {
    let tracker = open_tracker(path)?;
    let retention = Duration::from_secs(retention_days.saturating_mul(SECS_PER_DAY));
    let purged = tracker.purge_expired(owner, retention)?;

    println!("Purged {purged} tombstone(s) older than {retention_days} day(s)");
    Ok(())
}
