//! # Repsync Testkit
//!
//! Test utilities for repsync.
//!
//! This crate provides:
//! - Devices (store, clock and engine) sharing one in-memory cloud
//! - Record and entity builders
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use repsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn two_devices_converge() {
//!     let cloud = shared_cloud();
//!     let phone = TestDevice::new(&cloud, &owner("alice"), 1_000);
//!     let tablet = TestDevice::new(&cloud, &owner("alice"), 1_000);
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
