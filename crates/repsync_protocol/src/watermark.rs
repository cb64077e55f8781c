//! Per-owner sync cursors.

use crate::id::OwnerId;
use crate::record::Timestamp;
use serde::{Deserialize, Serialize};

/// Cursors marking how far each direction of sync has progressed for an owner.
///
/// A watermark is created on the first sync for a user and only moves forward
/// after a fully successful half-cycle. It is rolled back only by an explicit
/// full resync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWatermark {
    /// Owning user.
    pub owner_id: OwnerId,
    /// Greatest `updated_at` acknowledged by the cloud in a completed push.
    pub last_pushed_at: Option<Timestamp>,
    /// Greatest `updated_at` observed in a completed pull.
    pub last_pulled_at: Option<Timestamp>,
}

impl SyncWatermark {
    /// Creates an empty watermark for an owner.
    pub fn new(owner_id: OwnerId) -> Self {
        Self {
            owner_id,
            last_pushed_at: None,
            last_pulled_at: None,
        }
    }

    /// Advances the push cursor; never moves it backwards.
    pub fn advance_pushed(&mut self, updated_at: Timestamp) {
        self.last_pushed_at = Some(self.last_pushed_at.map_or(updated_at, |t| t.max(updated_at)));
    }

    /// Advances the pull cursor; never moves it backwards.
    pub fn advance_pulled(&mut self, updated_at: Timestamp) {
        self.last_pulled_at = Some(self.last_pulled_at.map_or(updated_at, |t| t.max(updated_at)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_is_monotonic() {
        let mut watermark = SyncWatermark::new(OwnerId::new("alice").unwrap());
        assert_eq!(watermark.last_pulled_at, None);

        watermark.advance_pulled(200);
        watermark.advance_pulled(150);
        assert_eq!(watermark.last_pulled_at, Some(200));

        watermark.advance_pushed(90);
        watermark.advance_pushed(120);
        assert_eq!(watermark.last_pushed_at, Some(120));
    }
}
