//! # driftsync Storage
//!
//! Async key-value persistence for driftsync.
//!
//! Stores are **opaque byte stores** addressed by string keys. Higher layers
//! own every record format; the store only moves bytes.
//!
//! ## Design Principles
//!
//! - One async trait, [`KvStore`], with whole-value `get`/`put`/`delete`
//! - No knowledge of archives, operation logs or backups
//! - Must be `Send + Sync` so a single `Arc<dyn KvStore>` backs every service
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral use
//! - [`FileStore`] - One file per key in a directory

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(not(test), warn(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::KvStore;
