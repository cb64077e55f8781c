//! Record and owner identifiers.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Globally unique identifier for a synced record.
///
/// Record IDs are 128-bit UUIDs that are:
/// - Generated on the device that creates the record
/// - Identical in the local store and the cloud store
/// - Never remapped or reused
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId([u8; 16]);

impl RecordId {
    /// Creates a record ID from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Creates a new random record ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Converts to a UUID.
    #[must_use]
    pub fn to_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.0)
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.to_uuid())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid())
    }
}

impl FromStr for RecordId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        Uuid::parse_str(s.trim())
            .map(|uuid| Self(uuid.into_bytes()))
            .map_err(|_| ProtocolError::InvalidId(s.to_string()))
    }
}

impl From<Uuid> for RecordId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.into_bytes())
    }
}

/// Identifier of the user who owns a set of records.
///
/// Every sync operation, watermark and status value is partitioned by owner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    /// Creates an owner ID, rejecting empty or whitespace-only values.
    pub fn new(value: impl Into<String>) -> ProtocolResult<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::EmptyOwner);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the owner ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OwnerId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_unique() {
        let id1 = RecordId::new();
        let id2 = RecordId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn parse_display_roundtrip() {
        let id = RecordId::new();
        let parsed: RecordId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<RecordId>().unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidId(_)));
    }

    #[test]
    fn debug_format() {
        let id = RecordId::from_bytes([0u8; 16]);
        assert_eq!(
            format!("{id:?}"),
            "RecordId(00000000-0000-0000-0000-000000000000)"
        );
    }

    #[test]
    fn owner_trims_and_rejects_empty() {
        assert_eq!(OwnerId::new("  alice ").unwrap().as_str(), "alice");
        assert!(matches!(OwnerId::new("   "), Err(ProtocolError::EmptyOwner)));
    }
}
