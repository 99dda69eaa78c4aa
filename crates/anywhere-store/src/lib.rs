//! Key-value persistence with multiple backend support
//!
//! Everything Anywhere keeps between runs (connection start markers, the
//! session config cache, saved profiles, hub credentials) goes through the
//! [`KeyValueStore`] trait:
//!
//! - **Memory** (`MemoryStore`): process-local map, used by tests
//! - **File** (`FileStore`): a single JSON document on disk
//!
//! # Example
//!
//! ```rust,ignore
//! use anywhere_store::{FileStore, KeyValueStore, KeyValueStoreExt};
//!
//! let store = FileStore::open("~/.local/share/anywhere/store.json")?;
//! store.set("session.wg0.started_at", "1700000000000")?;
//! let profiles: Option<Vec<String>> = store.get_json("profiles")?;
//! ```
//!
//! # Features
//!
//! - `memory` (default): in-memory backend
//! - `file` (default): JSON file backend

mod backends;
mod error;
mod store;

pub use error::StoreError;
pub use store::{KeyValueStore, KeyValueStoreExt};

#[cfg(feature = "file")]
pub use backends::file::FileStore;

#[cfg(feature = "memory")]
pub use backends::memory::MemoryStore;
