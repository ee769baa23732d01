//! Core traits and types for the caching system.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Source of "now" for cache timestamps and expiry checks.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Mutex::new(start),
    }
  }

  pub fn advance(&self, by: Duration) {
    if let Ok(mut now) = self.now.lock() {
      *now += by;
    }
  }

  pub fn set(&self, to: DateTime<Utc>) {
    if let Ok(mut now) = self.now.lock() {
      *now = to;
    }
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    self
      .now
      .lock()
      .map(|now| *now)
      .unwrap_or_else(|poisoned| *poisoned.into_inner())
  }
}

/// A cached value together with the time it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub data: T,
  pub timestamp: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
  /// An entry is valid while `now - timestamp <= expiry`.
  pub fn is_valid_at(&self, now: DateTime<Utc>, expiry: Duration) -> bool {
    now - self.timestamp <= expiry
  }
}

/// Metadata about a stored entry, without its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntryInfo {
  pub data_type: String,
  pub timestamp: DateTime<Utc>,
  pub age: Duration,
  pub expired: bool,
  /// Size of the serialized entry in bytes
  pub size: usize,
}
