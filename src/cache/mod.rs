//! Persisted cache for API responses.
//!
//! This module provides the second tier of the data-access chain:
//! - Stores one JSON entry per data type, stamped with its write time
//! - Treats entries older than the expiry window as absent (lazy invalidation)
//! - Swallows storage failures so a broken cache behaves like an empty one

mod storage;
mod store;
mod traits;

pub use storage::{CacheStorage, MemoryStorage, NoopStorage, SqliteStorage};
pub use store::{default_expiry, CacheStore, DEFAULT_PREFIX};
pub use traits::{CacheEntry, CacheEntryInfo, Clock, ManualClock, SystemClock};
