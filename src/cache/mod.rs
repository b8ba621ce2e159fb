//! Versioned cache buckets for offline support.
//!
//! - `storage`: where buckets live (SQLite), written whole and read by key
//! - `lifecycle`: install a version atomically, purge every other version on
//!   activate, track the worker state
//! - `types`: cache versions and routed-response metadata

mod lifecycle;
mod storage;
mod types;

pub use lifecycle::{ActivationReport, CacheLifecycleManager, InstallReport, WorkerState};
pub use storage::{CacheEntry, CacheStorage, CachedResponse, SqliteStorage};
pub use types::{CacheVersion, ResponseSource, Routed};
