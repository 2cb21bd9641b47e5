//! # driftsync Testkit
//!
//! Test utilities for driftsync.
//!
//! This crate provides:
//! - A wired test environment over in-memory or temp-dir storage
//! - Task and time-tracking builders
//! - A fault-injecting store for rollback tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use driftsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn archive_round_trip() {
//!     let env = TestEnv::memory();
//!     env.archive.move_to_archive(&[parent_with_subtasks("p", 2, NOW)], &Default::default())
//!         .await
//!         .unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
