//! Status command implementation.

use super::{open_tracker, RecordView};
use repsync_protocol::{OwnerId, Timestamp};
use repsync_store::RecordStore;
use serde::Serialize;
use std::path::Path;

/// Local sync status of one owner.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Owner id.
    pub owner: String,
    /// Live record count.
    pub live_records: usize,
    /// Records waiting for upload.
    pub pending: usize,
    /// Local tombstones.
    pub tombstones: usize,
    /// Newest acknowledged upload time.
    pub last_pushed_at: Option<Timestamp>,
    /// Pull watermark.
    pub last_pulled_at: Option<Timestamp>,
    /// Pending records whose last upload was refused.
    pub failing: Vec<RecordView>,
}

/// Builds the status report of `owner`.
pub fn collect(store: &RecordStore, owner: &OwnerId) -> StatusReport {
    let watermark = store.watermark(owner);
    let pending = store.pending(owner);
    StatusReport {
        owner: owner.to_string(),
        live_records: store
            .records_for(owner)
            .iter()
            .filter(|r| !r.is_tombstone())
            .count(),
        pending: pending.len(),
        tombstones: store.tombstones(owner).len(),
        last_pushed_at: watermark.as_ref().and_then(|w| w.last_pushed_at),
        last_pulled_at: watermark.as_ref().and_then(|w| w.last_pulled_at),
        failing: pending
            .iter()
            .filter(|r| r.sync_error.is_some())
            .map(RecordView::from)
            .collect(),
    }
}

/// Runs the status command.
pub fn run(path: &Path, owner: &OwnerId, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let tracker = open_tracker(path)?;
    let report = collect(tracker.store(), owner);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => print_text_output(&report),
    }

    Ok(())
}

fn print_text_output(report: &StatusReport) {
    let show = |ts: Option<Timestamp>| ts.map_or_else(|| "never".to_string(), |t| t.to_string());

    println!("Owner: {}", report.owner);
    println!("  Live records: {}", report.live_records);
    println!("  Pending:      {}", report.pending);
    println!("  Tombstones:   {}", report.tombstones);
    println!("  Last push:    {}", show(report.last_pushed_at));
    println!("  Last pull:    {}", show(report.last_pulled_at));

    if !report.failing.is_empty() {
        println!();
        println!("Failing records:");
        for record in &report.failing {
            println!(
                "  {} ({}): {}",
                record.id,
                record.entity_type,
                record.sync_error.as_deref().unwrap_or_default()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repsync_protocol::{EntityType, Payload};
    use repsync_store::ChangeTracker;
    use std::sync::Arc;

    #[test]
    fn fresh_owner_has_empty_status() {
        let store = RecordStore::open_in_memory();
        let report = collect(&store, &OwnerId::new("alice").unwrap());
        assert_eq!(report.live_records, 0);
        assert_eq!(report.pending, 0);
        assert_eq!(report.last_pulled_at, None);
    }

    #[test]
    fn counts_pending_and_tombstones() {
        let tracker = ChangeTracker::new(Arc::new(RecordStore::open_in_memory()));
        let owner = OwnerId::new("alice").unwrap();
        let a = tracker.create(&owner, EntityType::WorkoutLog, Payload::default()).unwrap();
        tracker.create(&owner, EntityType::WorkoutLog, Payload::default()).unwrap();
        tracker.delete(&a.id).unwrap();
        tracker.revert_to_dirty(&a.id, Some("rejected".into())).unwrap();

        let report = collect(tracker.store(), &owner);
        assert_eq!(report.live_records, 1);
        assert_eq!(report.tombstones, 1);
        assert_eq!(report.pending, 2);
        assert_eq!(report.failing.len(), 1);
        assert_eq!(report.failing[0].sync_error.as_deref(), Some("rejected"));
    }
}
