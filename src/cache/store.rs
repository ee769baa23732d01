//! Typed cache store with lazy expiry on top of a key/value backend.

use chrono::Duration;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::{CacheEntry, CacheEntryInfo, Clock, SystemClock};

/// Default key prefix for cache entries.
pub const DEFAULT_PREFIX: &str = "fallback_";

/// Default time an entry stays valid.
pub fn default_expiry() -> Duration {
  Duration::hours(24)
}

/// Persisted cache keyed by data type.
///
/// Storage failures never escape this type: a failed read is a miss, a failed
/// write or removal is logged and dropped.
pub struct CacheStore<S: CacheStorage> {
  storage: Arc<S>,
  prefix: String,
  expiry: Duration,
  clock: Arc<dyn Clock>,
}

impl<S: CacheStorage> CacheStore<S> {
  /// Create a new store with the default prefix, a 24 hour expiry and the wall clock.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      prefix: DEFAULT_PREFIX.to_string(),
      expiry: default_expiry(),
      clock: Arc::new(SystemClock),
    }
  }

  pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.prefix = prefix.into();
    self
  }

  pub fn with_expiry(mut self, expiry: Duration) -> Self {
    self.expiry = expiry;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn expiry(&self) -> Duration {
    self.expiry
  }

  pub fn prefix(&self) -> &str {
    &self.prefix
  }

  fn key(&self, data_type: &str) -> String {
    format!("{}{}", self.prefix, data_type)
  }

  /// Read the entry for `data_type` using the store's expiry window.
  pub fn get<T: DeserializeOwned>(&self, data_type: &str) -> Option<CacheEntry<T>> {
    self.get_with_expiry(data_type, self.expiry)
  }

  /// Read the entry for `data_type`, treating it as absent if older than `expiry`.
  ///
  /// Expired entries are left in place; the next write replaces them.
  pub fn get_with_expiry<T: DeserializeOwned>(
    &self,
    data_type: &str,
    expiry: Duration,
  ) -> Option<CacheEntry<T>> {
    let raw = self.read_raw(data_type)?;

    let entry: CacheEntry<T> = match serde_json::from_str(&raw) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(data_type, error = %e, "Ignoring corrupt cache entry");
        return None;
      }
    };

    if !entry.is_valid_at(self.clock.now(), expiry) {
      debug!(data_type, cached_at = %entry.timestamp, "Cache entry expired");
      return None;
    }

    Some(entry)
  }

  /// Write `data` for `data_type`, stamped with the current time.
  pub fn set<T: Serialize>(&self, data_type: &str, data: &T) {
    let entry = CacheEntryRef {
      data,
      timestamp: self.clock.now(),
    };

    let raw = match serde_json::to_string(&entry) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(data_type, error = %e, "Failed to serialize cache entry");
        return;
      }
    };

    if let Err(e) = self.storage.set_item(&self.key(data_type), &raw) {
      warn!(data_type, error = %e, "Failed to write cache entry");
    }
  }

  /// Remove the entry for `data_type`.
  pub fn clear(&self, data_type: &str) {
    if let Err(e) = self.storage.remove_item(&self.key(data_type)) {
      warn!(data_type, error = %e, "Failed to clear cache entry");
    }
  }

  /// Remove every entry under this store's prefix. Returns how many were removed.
  pub fn clear_all(&self) -> usize {
    let mut removed = 0;
    for data_type in self.data_types() {
      if self.storage.remove_item(&self.key(&data_type)).is_ok() {
        removed += 1;
      }
    }
    removed
  }

  /// Data types with a stored entry, expired or not.
  pub fn data_types(&self) -> Vec<String> {
    match self.storage.keys_with_prefix(&self.prefix) {
      Ok(keys) => keys
        .into_iter()
        .filter_map(|k| k.strip_prefix(&self.prefix).map(String::from))
        .collect(),
      Err(e) => {
        warn!(error = %e, "Failed to list cache entries");
        Vec::new()
      }
    }
  }

  /// Describe the stored entry for `data_type` without decoding its payload.
  pub fn inspect(&self, data_type: &str) -> Option<CacheEntryInfo> {
    #[derive(Deserialize)]
    struct Stamp {
      timestamp: chrono::DateTime<chrono::Utc>,
    }

    let raw = self.read_raw(data_type)?;
    let stamp: Stamp = serde_json::from_str(&raw).ok()?;
    let age = self.clock.now() - stamp.timestamp;

    Some(CacheEntryInfo {
      data_type: data_type.to_string(),
      timestamp: stamp.timestamp,
      age,
      expired: age > self.expiry,
      size: raw.len(),
    })
  }

  fn read_raw(&self, data_type: &str) -> Option<String> {
    match self.storage.get_item(&self.key(data_type)) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(data_type, error = %e, "Failed to read cache entry");
        None
      }
    }
  }
}

impl<S: CacheStorage> Clone for CacheStore<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      prefix: self.prefix.clone(),
      expiry: self.expiry,
      clock: Arc::clone(&self.clock),
    }
  }
}

/// Borrowing twin of [`CacheEntry`] so writes don't need to clone the payload.
#[derive(Serialize)]
struct CacheEntryRef<'a, T> {
  data: &'a T,
  timestamp: chrono::DateTime<chrono::Utc>,
}
