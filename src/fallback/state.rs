//! State and options for [`FallbackData`](super::FallbackData).

use chrono::Duration;
use std::sync::Arc;

use crate::cache::default_expiry;

/// Where the current data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataSource {
  /// Nothing loaded yet, or no tier had data
  #[default]
  Empty,
  /// Confirmed by a successful request in this session
  Live,
  /// Read from the persisted cache
  Cached,
  /// Bundled sample data from the fallback catalog
  Synthetic,
}

impl DataSource {
  /// Anything not freshly confirmed live counts as degraded.
  pub fn is_fallback(self) -> bool {
    matches!(self, DataSource::Cached | DataSource::Synthetic)
  }

  /// Short label for status badges.
  pub fn label(self) -> &'static str {
    match self {
      DataSource::Empty => "No Data",
      DataSource::Live => "Live",
      DataSource::Cached => "Using Cached Data",
      DataSource::Synthetic => "Offline Mode",
    }
  }
}

/// Snapshot of a data hook.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackState<T> {
  pub data: Option<T>,
  pub source: DataSource,
  /// Human-readable notice when serving degraded data
  pub error: Option<String>,
}

impl<T> FallbackState<T> {
  pub fn is_using_fallback(&self) -> bool {
    self.source.is_fallback()
  }
}

impl<T> Default for FallbackState<T> {
  fn default() -> Self {
    Self {
      data: None,
      source: DataSource::Empty,
      error: None,
    }
  }
}

/// Post-processing applied to data from every tier. Must be pure and idempotent.
pub type Transform<T> = Arc<dyn Fn(T) -> T + Send + Sync>;

/// Per-hook options.
pub struct FallbackOptions<T> {
  /// Read and write the persisted cache. Default: true.
  pub enable_cache: bool,
  /// How long a cache entry stays valid for this hook. Default: 24h.
  pub cache_expiry: Duration,
  /// Default: identity.
  pub transform: Transform<T>,
}

impl<T> FallbackOptions<T> {
  pub fn without_cache(mut self) -> Self {
    self.enable_cache = false;
    self
  }

  pub fn with_cache_expiry(mut self, expiry: Duration) -> Self {
    self.cache_expiry = expiry;
    self
  }

  pub fn with_transform<F>(mut self, transform: F) -> Self
  where
    F: Fn(T) -> T + Send + Sync + 'static,
  {
    self.transform = Arc::new(transform);
    self
  }
}

impl<T: 'static> Default for FallbackOptions<T> {
  fn default() -> Self {
    Self {
      enable_cache: true,
      cache_expiry: default_expiry(),
      transform: Arc::new(|data: T| data),
    }
  }
}

impl<T> Clone for FallbackOptions<T> {
  fn clone(&self) -> Self {
    Self {
      enable_cache: self.enable_cache,
      cache_expiry: self.cache_expiry,
      transform: Arc::clone(&self.transform),
    }
  }
}

impl<T> std::fmt::Debug for FallbackOptions<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FallbackOptions")
      .field("enable_cache", &self.enable_cache)
      .field("cache_expiry", &self.cache_expiry)
      .finish_non_exhaustive()
  }
}
