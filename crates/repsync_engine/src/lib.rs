//! # Repsync Engine
//!
//! Reconciliation engine between the local record store and the cloud.
//!
//! This crate provides:
//! - `CloudStore`: the cloud store client seam, with an in-memory reference
//!   implementation
//! - Push and pull pipelines
//! - `SyncCoordinator`: one push-then-pull cycle per owner at a time
//! - `SyncScheduler`: periodic background cycles
//! - `SyncEngine`: the facade used by the UI layer
//!
//! ## Architecture
//!
//! The engine implements a **push-then-pull** cycle:
//! 1. Upload locally dirty records in bounded batches
//! 2. Fetch every record changed in the cloud since the pull watermark
//! 3. Settle divergences with last-writer-wins
//!
//! ## Key Invariants
//!
//! - Push completes before pull starts
//! - At most one cycle runs per owner; concurrent callers join it
//! - Watermarks only advance after a fully successful half-cycle
//! - `sync_now` never fails; errors are reported in the result

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cloud;
mod config;
mod coordinator;
mod engine;
mod error;
mod pull;
mod push;
mod scheduler;
mod session;
mod status;

pub use cloud::{CloudStore, MemoryCloudStore};
pub use config::SyncConfig;
pub use coordinator::SyncCoordinator;
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use pull::{PullPipeline, PullResult};
pub use push::{PushPipeline, PushResult};
pub use scheduler::SyncScheduler;
pub use session::{SessionProvider, SignedOutSession, StaticSession};
pub use status::{SyncCycleResult, SyncCycleStatus, SyncStats};
