//! CLI command implementations.

pub mod delete;
pub mod list;
pub mod log;
pub mod purge;
pub mod status;
pub mod sync;

use repsync_protocol::{SyncState, SyncableRecord, Timestamp};
use repsync_store::{ChangeTracker, RecordStore};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Opens the record store at `path`, creating it when missing.
pub fn open_tracker(path: &Path) -> Result<ChangeTracker, Box<dyn std::error::Error>> {
    let store = RecordStore::open(path)?;
    Ok(ChangeTracker::new(Arc::new(store)))
}

/// A record as shown by the CLI. Payload bytes are summarized by size.
#[derive(Debug, Serialize)]
pub struct RecordView {
    /// Record id.
    pub id: String,
    /// Entity type name.
    pub entity_type: &'static str,
    /// Last modification time (ms).
    pub updated_at: Timestamp,
    /// Deletion time (ms), for tombstones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
    /// Sync state name.
    pub sync_state: &'static str,
    /// Payload size in bytes.
    pub payload_size: usize,
    /// Last reported sync failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_error: Option<String>,
}

impl From<&SyncableRecord> for RecordView {
    fn from(record: &SyncableRecord) -> Self {
        Self {
            id: record.id.to_string(),
            entity_type: record.entity_type.as_str(),
            updated_at: record.updated_at,
            deleted_at: record.deleted_at,
            sync_state: state_name(record.sync_state),
            payload_size: record.payload.len(),
            sync_error: record.sync_error.clone(),
        }
    }
}

fn state_name(state: SyncState) -> &'static str {
    match state {
        SyncState::Clean => "clean",
        SyncState::Dirty => "dirty",
        SyncState::Pushing => "pushing",
    }
}
