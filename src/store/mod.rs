//! Durable local storage for the offline engine.
//!
//! Holds two collections behind one handle:
//! - a TTL-bounded response cache, expired lazily on read
//! - an append-ordered queue of mutations waiting for replay

mod storage;
mod types;

pub use storage::{NoopStore, SqliteStore, Store, StoreError, StoreResult};
pub use types::{ActionType, CacheEntry, PendingAction};
