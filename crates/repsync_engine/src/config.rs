//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of records per upsert or delete call.
    pub push_batch_size: usize,
    /// Interval between background cycles.
    pub sync_interval: Duration,
    /// How long converged tombstones are kept before physical removal.
    pub tombstone_retention: Duration,
    /// Timeout applied to every cloud call.
    pub request_timeout: Duration,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            push_batch_size: 100,
            sync_interval: Duration::from_secs(30),
            tombstone_retention: Duration::from_secs(7 * 24 * 60 * 60),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the push batch size (at least 1).
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Sets the background sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the tombstone retention window.
    pub fn with_tombstone_retention(mut self, retention: Duration) -> Self {
        self.tombstone_retention = retention;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
