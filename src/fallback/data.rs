//! Fallback-aware data handle: live network, then cache, then bundled data.

use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{DataSource, FallbackOptions, FallbackState};
use crate::cache::{CacheStorage, CacheStore};
use crate::catalog::FallbackCatalog;
use crate::connectivity::{ConnectivityMonitor, OnlineStatus};
use crate::retry::{with_fallback, RetryError, RetryOptions, RetryOutcome};

/// Shared collaborators for every data handle in a process.
pub struct FallbackContext<S: CacheStorage> {
  pub cache: CacheStore<S>,
  pub catalog: Arc<FallbackCatalog>,
  pub connectivity: ConnectivityMonitor,
}

impl<S: CacheStorage> FallbackContext<S> {
  pub fn new(
    cache: CacheStore<S>,
    catalog: Arc<FallbackCatalog>,
    connectivity: ConnectivityMonitor,
  ) -> Self {
    Self {
      cache,
      catalog,
      connectivity,
    }
  }
}

impl<S: CacheStorage> Clone for FallbackContext<S> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      catalog: Arc::clone(&self.catalog),
      connectivity: self.connectivity.clone(),
    }
  }
}

/// Data for one data type, degrading through cache and catalog on failure.
///
/// Lifecycle mirrors a mounted UI widget: [`mount`](Self::mount) hydrates
/// from cache, fetches move it to live data, errors move it to cached or
/// bundled data. Dropping the handle cancels any request still retrying.
///
/// # Example
///
/// ```ignore
/// let mut alerts = FallbackData::<Vec<Alert>, _>::mount("alerts", &ctx, FallbackOptions::default());
/// alerts.fetch(move || api.get("alerts"), RetryOptions::default());
///
/// // In event loop tick
/// if alerts.poll() {
///     render(alerts.data(), alerts.source().label());
/// }
/// ```
pub struct FallbackData<T, S: CacheStorage> {
  data_type: String,
  cache: CacheStore<S>,
  catalog: Arc<FallbackCatalog>,
  online: OnlineStatus,
  options: FallbackOptions<T>,
  state: FallbackState<T>,
  /// Parent of every request token; cancelled on drop
  cancel: CancellationToken,
  inflight: Option<CancellationToken>,
  receiver: Option<mpsc::UnboundedReceiver<RetryOutcome<T, String>>>,
}

impl<T, S> FallbackData<T, S>
where
  T: Serialize + DeserializeOwned + Send + 'static,
  S: CacheStorage,
{
  /// Create a handle for `data_type` and hydrate it from the cache.
  pub fn mount(data_type: &str, ctx: &FallbackContext<S>, options: FallbackOptions<T>) -> Self {
    let mut handle = Self {
      data_type: data_type.to_string(),
      cache: ctx.cache.clone(),
      catalog: Arc::clone(&ctx.catalog),
      online: ctx.connectivity.subscribe(),
      options,
      state: FallbackState::default(),
      cancel: CancellationToken::new(),
      inflight: None,
      receiver: None,
    };

    if handle.hydrate_from_cache() {
      debug!(data_type, "Hydrated from cache on mount");
    }

    handle
  }

  pub fn data_type(&self) -> &str {
    &self.data_type
  }

  pub fn state(&self) -> &FallbackState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data.as_ref()
  }

  pub fn source(&self) -> DataSource {
    self.state.source
  }

  pub fn is_using_fallback(&self) -> bool {
    self.state.is_using_fallback()
  }

  pub fn error(&self) -> Option<&str> {
    self.state.error.as_deref()
  }

  /// Set new data.
  ///
  /// Data from the API marks the handle live, clears the notice and is
  /// written to the cache untransformed. Local updates only replace the data.
  pub fn update_data(&mut self, data: T, from_api: bool) {
    if from_api {
      if self.options.enable_cache {
        self.cache.set(&self.data_type, &data);
      }
      self.state.source = DataSource::Live;
      self.state.error = None;
    }
    self.state.data = Some((self.options.transform)(data));
  }

  /// React to a failed request: serve the cache if it is still valid, the catalog otherwise.
  pub fn handle_api_error(&mut self, error: impl Display) {
    warn!(data_type = %self.data_type, error = %error, "API request failed");

    if self.hydrate_from_cache() {
      info!(data_type = %self.data_type, "Serving cached data");
      self.state.error = Some(self.notice("Showing cached data."));
    } else {
      self.load_fallback();
    }
  }

  /// Serve the bundled dataset and persist it so the next mount finds a warm cache.
  pub fn load_fallback(&mut self) {
    match self.catalog.lookup_as::<T>(&self.data_type) {
      Some(data) => {
        info!(data_type = %self.data_type, "Serving bundled fallback data");
        if self.options.enable_cache {
          self.cache.set(&self.data_type, &data);
        }
        self.state.data = Some((self.options.transform)(data));
        self.state.source = DataSource::Synthetic;
        self.state.error = Some(self.notice("Showing sample data."));
      }
      None => {
        warn!(data_type = %self.data_type, "No fallback data available");
        self.state.data = None;
        self.state.source = DataSource::Empty;
        self.state.error = Some(self.notice("No data is available offline."));
      }
    }
  }

  /// Remove this data type's cache entry. The current data is kept.
  pub fn clear_cache(&self) {
    self.cache.clear(&self.data_type);
  }

  /// Check if a request is in flight.
  pub fn is_loading(&self) -> bool {
    self.receiver.is_some()
  }

  /// Start a request if none is in flight.
  ///
  /// The request runs on its own task with [`with_fallback`]; call
  /// [`poll`](Self::poll) or [`settle`](Self::settle) to apply the result.
  pub fn fetch<F, Fut, E>(&mut self, operation: F, retry: RetryOptions)
  where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Display + Send + 'static,
  {
    if self.is_loading() {
      return;
    }
    self.start_fetch(operation, retry);
  }

  /// Cancel any pending request and start a new one.
  pub fn refetch<F, Fut, E>(&mut self, operation: F, retry: RetryOptions)
  where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Display + Send + 'static,
  {
    self.cancel_inflight();
    self.start_fetch(operation, retry);
  }

  /// Apply a finished request without blocking.
  ///
  /// Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(outcome) => {
        self.finish();
        self.apply(outcome)
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Sender dropped without sending - the task panicked
        self.finish();
        self.handle_api_error("request task ended unexpectedly");
        true
      }
    }
  }

  /// Wait for the pending request, if any, and apply it.
  ///
  /// Returns `true` if the state changed.
  pub async fn settle(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    let outcome = receiver.recv().await;
    self.finish();
    match outcome {
      Some(outcome) => self.apply(outcome),
      None => {
        self.handle_api_error("request task ended unexpectedly");
        true
      }
    }
  }

  fn apply(&mut self, outcome: RetryOutcome<T, String>) -> bool {
    match outcome {
      RetryOutcome::Success { data } => {
        self.update_data(data, true);
        true
      }
      RetryOutcome::Failure {
        error: RetryError::Cancelled,
        ..
      } => false,
      RetryOutcome::Failure {
        error: RetryError::Failed(error),
        ..
      } => {
        self.handle_api_error(error);
        true
      }
    }
  }

  fn start_fetch<F, Fut, E>(&mut self, operation: F, retry: RetryOptions)
  where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Display + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    let token = self.cancel.child_token();
    let retry = retry.with_cancel(token.clone());
    let catalog = Arc::clone(&self.catalog);
    let data_type = self.data_type.clone();

    self.receiver = Some(rx);
    self.inflight = Some(token);

    tokio::spawn(async move {
      let outcome = with_fallback(operation, &data_type, &catalog, &retry)
        .await
        .map_err(|e| e.to_string());
      // Ignore send errors - the handle may have been dropped
      let _ = tx.send(outcome);
    });
  }

  fn finish(&mut self) {
    self.receiver = None;
    self.inflight = None;
  }

  fn cancel_inflight(&mut self) {
    if let Some(token) = self.inflight.take() {
      token.cancel();
    }
    self.receiver = None;
  }

  /// Returns `true` if a valid cache entry was loaded.
  fn hydrate_from_cache(&mut self) -> bool {
    if !self.options.enable_cache {
      return false;
    }

    match self
      .cache
      .get_with_expiry::<T>(&self.data_type, self.options.cache_expiry)
    {
      Some(entry) => {
        self.state.data = Some((self.options.transform)(entry.data));
        self.state.source = DataSource::Cached;
        true
      }
      None => false,
    }
  }

  fn notice(&self, detail: &str) -> String {
    if self.online.is_online() {
      format!("Unable to reach the server. {}", detail)
    } else {
      format!("You are offline. {}", detail)
    }
  }
}

impl<T, S: CacheStorage> Drop for FallbackData<T, S> {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

impl<T: std::fmt::Debug, S: CacheStorage> std::fmt::Debug for FallbackData<T, S> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FallbackData")
      .field("data_type", &self.data_type)
      .field("state", &self.state)
      .field("loading", &self.receiver.is_some())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ManualClock, MemoryStorage};
  use crate::connectivity::ConnectivityEvent;
  use chrono::{TimeZone, Utc};
  use serde_json::{json, Value};
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  fn context() -> FallbackContext<MemoryStorage> {
    FallbackContext::new(
      CacheStore::new(MemoryStorage::new()),
      Arc::new(FallbackCatalog::builtin()),
      ConnectivityMonitor::new(true),
    )
  }

  fn mount(ctx: &FallbackContext<MemoryStorage>, data_type: &str) -> FallbackData<Value, MemoryStorage> {
    FallbackData::mount(data_type, ctx, FallbackOptions::default())
  }

  #[test]
  fn test_mount_with_empty_cache_is_uninitialized() {
    let ctx = context();
    let hook = mount(&ctx, "alerts");
    assert_eq!(hook.source(), DataSource::Empty);
    assert!(hook.data().is_none());
    assert!(!hook.is_using_fallback());
    assert!(hook.error().is_none());
  }

  #[test]
  fn test_mount_hydrates_from_cache() {
    let ctx = context();
    ctx.cache.set("alerts", &json!(["cached"]));

    let hook = mount(&ctx, "alerts");
    assert_eq!(hook.data(), Some(&json!(["cached"])));
    assert_eq!(hook.source(), DataSource::Cached);
    assert!(hook.is_using_fallback());
    assert!(hook.error().is_none());
  }

  #[test]
  fn test_mount_without_cache_ignores_entry() {
    let ctx = context();
    ctx.cache.set("alerts", &json!(["cached"]));

    let hook: FallbackData<Value, _> =
      FallbackData::mount("alerts", &ctx, FallbackOptions::default().without_cache());
    assert!(hook.data().is_none());
  }

  #[test]
  fn test_live_update_writes_through() {
    let ctx = context();
    let mut hook = mount(&ctx, "alerts");
    hook.handle_api_error("timeout");
    assert!(hook.is_using_fallback());

    hook.update_data(json!(["live"]), true);
    assert_eq!(hook.source(), DataSource::Live);
    assert!(!hook.is_using_fallback());
    assert!(hook.error().is_none());
    assert_eq!(
      ctx.cache.get::<Value>("alerts").map(|e| e.data),
      Some(json!(["live"]))
    );
  }

  #[test]
  fn test_local_update_skips_cache() {
    let ctx = context();
    let mut hook = mount(&ctx, "alerts");
    hook.update_data(json!(["draft"]), false);

    assert_eq!(hook.data(), Some(&json!(["draft"])));
    assert_eq!(hook.source(), DataSource::Empty);
    assert!(ctx.cache.get::<Value>("alerts").is_none());
  }

  #[test]
  fn test_api_error_prefers_valid_cache() {
    let ctx = context();
    let mut hook = mount(&ctx, "alerts");
    ctx.cache.set("alerts", &json!(["from another widget"]));

    hook.handle_api_error("503 Service Unavailable");
    assert_eq!(hook.data(), Some(&json!(["from another widget"])));
    assert_eq!(hook.source(), DataSource::Cached);
    assert!(hook.is_using_fallback());
    assert_eq!(
      hook.error(),
      Some("Unable to reach the server. Showing cached data.")
    );
  }

  #[test]
  fn test_api_error_without_cache_uses_catalog_and_warms_cache() {
    let ctx = context();
    let mut hook = mount(&ctx, "verificationTasks");

    hook.handle_api_error("connection refused");
    assert_eq!(hook.source(), DataSource::Synthetic);
    assert_eq!(hook.data(), ctx.catalog.lookup("verificationTasks"));
    assert_eq!(
      ctx.cache.get::<Value>("verificationTasks").map(|e| e.data).as_ref(),
      ctx.catalog.lookup("verificationTasks")
    );

    // Next mount finds the warm cache instead of the catalog
    let next = mount(&ctx, "verificationTasks");
    assert_eq!(next.source(), DataSource::Cached);
  }

  #[test]
  fn test_expired_cache_falls_through_to_catalog() {
    let clock = Arc::new(ManualClock::new(
      Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap(),
    ));
    let ctx = FallbackContext::new(
      CacheStore::new(MemoryStorage::new()).with_clock(clock.clone()),
      Arc::new(FallbackCatalog::builtin()),
      ConnectivityMonitor::new(true),
    );
    ctx.cache.set("alerts", &json!(["stale"]));
    clock.advance(chrono::Duration::hours(25));

    let mut hook = mount(&ctx, "alerts");
    assert_eq!(hook.source(), DataSource::Empty);

    hook.handle_api_error("timeout");
    assert_eq!(hook.source(), DataSource::Synthetic);
    assert_eq!(hook.data(), ctx.catalog.lookup("alerts"));
  }

  #[test]
  fn test_per_hook_cache_expiry() {
    let clock = Arc::new(ManualClock::new(
      Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap(),
    ));
    let ctx = FallbackContext::new(
      CacheStore::new(MemoryStorage::new()).with_clock(clock.clone()),
      Arc::new(FallbackCatalog::builtin()),
      ConnectivityMonitor::new(true),
    );
    ctx.cache.set("alerts", &json!(["recent"]));
    clock.advance(chrono::Duration::minutes(10));

    let short: FallbackData<Value, _> = FallbackData::mount(
      "alerts",
      &ctx,
      FallbackOptions::default().with_cache_expiry(chrono::Duration::minutes(5)),
    );
    assert_eq!(short.source(), DataSource::Empty);
    assert_eq!(mount(&ctx, "alerts").source(), DataSource::Cached);
  }

  #[test]
  fn test_fallback_without_cache_does_not_persist() {
    let ctx = context();
    let mut hook: FallbackData<Value, _> =
      FallbackData::mount("alerts", &ctx, FallbackOptions::default().without_cache());

    hook.handle_api_error("connection refused");
    assert_eq!(hook.source(), DataSource::Synthetic);
    assert_eq!(hook.data(), ctx.catalog.lookup("alerts"));
    assert!(ctx.cache.get::<Value>("alerts").is_none());
    assert!(ctx.cache.data_types().is_empty());
  }

  #[test]
  fn test_missing_catalog_entry_yields_no_data() {
    let ctx = context();
    let mut hook = mount(&ctx, "unknownWidget");
    hook.update_data(json!({"stale": true}), false);

    hook.load_fallback();
    assert!(hook.data().is_none());
    assert_eq!(hook.source(), DataSource::Empty);
    assert!(hook.error().is_some());
  }

  #[test]
  fn test_offline_notice_wording() {
    let ctx = context();
    ctx.connectivity.handle_event(ConnectivityEvent::Offline);
    let mut hook = mount(&ctx, "alerts");

    hook.load_fallback();
    assert_eq!(hook.error(), Some("You are offline. Showing sample data."));
    assert_eq!(hook.source().label(), "Offline Mode");
  }

  #[test]
  fn test_clear_then_mount_offline_uses_catalog_only() {
    let ctx = context();
    ctx.cache.set("mettaStats", &json!({"metta_stats": {"total_atoms": 1}}));

    let hook = mount(&ctx, "mettaStats");
    hook.clear_cache();
    drop(hook);

    ctx.connectivity.set_online(false);
    let mut fresh = mount(&ctx, "mettaStats");
    assert_eq!(fresh.source(), DataSource::Empty);

    fresh.handle_api_error("network disabled");
    assert_eq!(fresh.source(), DataSource::Synthetic);
    assert_eq!(fresh.data(), ctx.catalog.lookup("mettaStats"));
  }

  #[test]
  fn test_idempotent_transform_survives_cache_round_trip() {
    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Alert {
      title: String,
    }

    let upper = |alerts: Vec<Alert>| -> Vec<Alert> {
      alerts
        .into_iter()
        .map(|a| Alert {
          title: a.title.to_uppercase(),
        })
        .collect()
    };

    let raw = vec![Alert {
      title: "Flood warning".to_string(),
    }];
    assert_eq!(upper(upper(raw.clone())), upper(raw.clone()));

    let ctx = context();
    let options = FallbackOptions::default().with_transform(upper);
    let mut hook: FallbackData<Vec<Alert>, _> = FallbackData::mount("alerts", &ctx, options.clone());
    hook.update_data(raw.clone(), true);
    let live = hook.data().cloned();

    let remounted: FallbackData<Vec<Alert>, _> = FallbackData::mount("alerts", &ctx, options);
    assert_eq!(remounted.data().cloned(), live);
    assert_eq!(live.unwrap()[0].title, "FLOOD WARNING");
  }

  #[tokio::test(start_paused = true)]
  async fn test_fetch_success_goes_live() {
    let ctx = context();
    let mut hook = mount(&ctx, "alerts");

    hook.fetch(|| async { Ok::<_, String>(json!(["live"])) }, RetryOptions::default());
    assert!(hook.is_loading());

    assert!(hook.settle().await);
    assert!(!hook.is_loading());
    assert_eq!(hook.source(), DataSource::Live);
    assert_eq!(hook.data(), Some(&json!(["live"])));
  }

  #[tokio::test(start_paused = true)]
  async fn test_fetch_failure_falls_back_after_retries() {
    let ctx = context();
    let mut hook = mount(&ctx, "alerts");
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    hook.fetch(
      move || {
        let counter = counter.clone();
        async move {
          counter.fetch_add(1, Ordering::SeqCst);
          Err::<Value, _>("500 Internal Server Error")
        }
      },
      RetryOptions::default(),
    );

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert!(hook.poll());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(hook.source(), DataSource::Synthetic);
    assert_eq!(hook.data(), ctx.catalog.lookup("alerts"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_fetch_while_loading_is_noop() {
    let ctx = context();
    let mut hook = mount(&ctx, "alerts");
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..2 {
      let counter = calls.clone();
      hook.fetch(
        move || {
          let counter = counter.clone();
          async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(Value::Null)
          }
        },
        RetryOptions::default(),
      );
    }

    hook.settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_refetch_cancels_pending() {
    let ctx = context();
    let mut hook = mount(&ctx, "alerts");

    hook.fetch(
      || async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok::<_, String>(json!("first"))
      },
      RetryOptions::default(),
    );
    hook.refetch(|| async { Ok::<_, String>(json!("second")) }, RetryOptions::default());

    hook.settle().await;
    assert_eq!(hook.data(), Some(&json!("second")));
  }

  #[tokio::test(start_paused = true)]
  async fn test_drop_cancels_pending_retries() {
    let ctx = context();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let mut hook = mount(&ctx, "alerts");
    hook.fetch(
      move || {
        let counter = counter.clone();
        async move {
          counter.fetch_add(1, Ordering::SeqCst);
          Err::<Value, _>("timeout")
        }
      },
      RetryOptions::default(),
    );

    // Let the first attempt run, then unmount during the backoff
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(hook);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(ctx.cache.get::<Value>("alerts").is_none());
  }
}
