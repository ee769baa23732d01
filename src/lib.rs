//! Resilient data access for the News Integrity dashboards.
//!
//! Every API call goes through three tiers: the live network (with retries),
//! the persisted cache, then a bundled fallback catalog. Connectivity is
//! tracked so the UI can explain which tier it is showing.

pub mod api;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod connectivity;
pub mod fallback;
pub mod logging;
pub mod retry;

pub use cache::{CacheEntry, CacheStorage, CacheStore, MemoryStorage, NoopStorage, SqliteStorage};
pub use catalog::FallbackCatalog;
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor, OnlineStatus};
pub use fallback::{DataSource, FallbackContext, FallbackData, FallbackOptions, FallbackState};
pub use retry::{with_fallback, RetryError, RetryOptions, RetryOutcome};
