//! List command implementation.

use super::{open_tracker, RecordView};
use repsync_protocol::{EntityType, OwnerId};
use repsync_store::ChangeTracker;
use std::path::Path;

/// Collects the live records of one entity type, newest first.
pub fn collect(tracker: &ChangeTracker, owner: &OwnerId, entity_type: EntityType) -> Vec<RecordView> {
    tracker
        .store()
        .list(owner, entity_type)
        .iter()
        .map(RecordView::from)
        .collect()
}

/// Runs the list command.
pub fn run(
    path: &Path,
    owner: &OwnerId,
    entity_type: EntityType,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let tracker = open_tracker(path)?;
    let records = collect(&tracker, owner, entity_type);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            if records.is_empty() {
                println!("No {entity_type} records for {owner}");
            }
            for record in &records {
                let error = record
                    .sync_error
                    .as_deref()
                    .map(|e| format!("  ! {e}"))
                    .unwrap_or_default();
                println!(
                    "{}  {:>15}  {:<8} {:>6} B{}",
                    record.id, record.updated_at, record.sync_state, record.payload_size, error
                );
            }
        }
    }

    Ok(())
}
