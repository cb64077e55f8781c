//! # Repsync Protocol
//!
//! Record model and reconciliation policy shared by the local store and the
//! sync engine.
//!
//! This crate provides:
//! - `SyncableRecord`, the shape every synced fitness entity shares
//! - `RemoteRecord`, `Tombstone` and `RecordAck` exchanged with the cloud store
//! - `SyncWatermark` cursors per owner
//! - The last-writer-wins conflict resolver
//! - Typed fitness entities encoded as canonical CBOR payloads
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod entity;
mod error;
mod id;
pub mod models;
mod payload;
mod record;
mod watermark;

pub use conflict::{resolve, Conflict, Resolution};
pub use entity::EntityType;
pub use error::{ProtocolError, ProtocolResult};
pub use id::{OwnerId, RecordId};
pub use models::Entity;
pub use payload::Payload;
pub use record::{RecordAck, RemoteRecord, SyncState, SyncableRecord, Timestamp, Tombstone};
pub use watermark::SyncWatermark;
