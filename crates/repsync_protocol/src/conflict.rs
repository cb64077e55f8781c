//! Conflict resolution between a diverged local record and its cloud version.
//!
//! The policy is last-writer-wins on `updated_at`. Ties go to the cloud: it
//! is the durable system of record shared by every device, so the device
//! holding the in-flight edit is the one that defers. Payloads are opaque to
//! the engine, so no field-level merge is attempted.

use crate::entity::EntityType;
use crate::id::RecordId;
use crate::record::{RemoteRecord, SyncableRecord, Timestamp};

/// Which version of a conflicting record survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the local version; it stays dirty and is uploaded next cycle.
    KeepLocal,
    /// Replace the local version with the cloud version.
    AcceptRemote,
}

/// Decides the winner between a local record with unacknowledged changes and
/// the cloud version of the same record.
///
/// The remote version wins when `remote.updated_at >= local.updated_at`.
pub fn resolve(local: &SyncableRecord, remote: &RemoteRecord) -> Resolution {
    resolve_timestamps(local.updated_at, remote.updated_at)
}

fn resolve_timestamps(local: Timestamp, remote: Timestamp) -> Resolution {
    if remote >= local {
        Resolution::AcceptRemote
    } else {
        Resolution::KeepLocal
    }
}

/// A resolved divergence, reported for diagnostics.
///
/// Conflicts are expected outcomes, never errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Record identifier.
    pub id: RecordId,
    /// Entity type.
    pub entity_type: EntityType,
    /// Local `updated_at` at resolution time.
    pub local_updated_at: Timestamp,
    /// Remote `updated_at` at resolution time.
    pub remote_updated_at: Timestamp,
    /// Which side won.
    pub resolution: Resolution,
}

impl Conflict {
    /// Resolves a divergence and records the outcome.
    pub fn settle(local: &SyncableRecord, remote: &RemoteRecord) -> Self {
        Self {
            id: local.id,
            entity_type: local.entity_type,
            local_updated_at: local.updated_at,
            remote_updated_at: remote.updated_at,
            resolution: resolve(local, remote),
        }
    }

    /// Returns true if the local edit was discarded.
    pub fn local_lost(&self) -> bool {
        self.resolution == Resolution::AcceptRemote
    }
}
