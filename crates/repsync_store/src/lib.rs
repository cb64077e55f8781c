//! # Repsync Store
//!
//! Local, embedded, transactional store of synced fitness records.
//!
//! This crate provides:
//! - `RecordStore`: records, per-owner watermarks and a sync-state index,
//!   optionally persisted as a CBOR snapshot on every commit
//! - `ChangeTracker`: the only path through which records change state,
//!   for both UI writes and remote updates
//! - `Clock` implementations used to stamp `updated_at`
//!
//! ## Key Invariants
//!
//! - `updated_at` strictly increases on every local mutation of a record
//! - Tombstones are invisible to application queries but kept for sync
//! - A transaction either commits all of its writes or none of them

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod error;
mod store;
mod tracker;

pub use clock::{next_timestamp, Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use store::{RecordStore, Transaction};
pub use tracker::{ApplyOutcome, ChangeTracker};
