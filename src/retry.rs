//! Retry wrapper that turns a failing network operation into a fallback signal.

use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::catalog::FallbackCatalog;

/// Retry policy for [`with_fallback`].
#[derive(Debug, Clone)]
pub struct RetryOptions {
  /// Attempts after the first one. Default: 2.
  pub max_retries: u32,
  /// Base backoff delay; attempt `n` waits `retry_delay * (n + 1)`. Default: 1s.
  pub retry_delay: Duration,
  /// Cancelling this stops the loop at the next attempt or backoff.
  pub cancel: CancellationToken,
}

impl Default for RetryOptions {
  fn default() -> Self {
    Self {
      max_retries: 2,
      retry_delay: Duration::from_millis(1000),
      cancel: CancellationToken::new(),
    }
  }
}

impl RetryOptions {
  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  /// Delay before the retry that follows failed attempt `attempt` (0-based).
  pub fn backoff(&self, attempt: u32) -> Duration {
    self.retry_delay.saturating_mul(attempt.saturating_add(1))
  }
}

/// Why the invoker gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
  /// Every attempt failed; carries the last failure.
  #[error("{0}")]
  Failed(E),
  /// The caller went away before an attempt succeeded.
  #[error("request cancelled")]
  Cancelled,
}

impl<E> RetryError<E> {
  pub fn is_cancelled(&self) -> bool {
    matches!(self, RetryError::Cancelled)
  }

  pub fn map<F, G: FnOnce(E) -> F>(self, f: G) -> RetryError<F> {
    match self {
      RetryError::Failed(e) => RetryError::Failed(f(e)),
      RetryError::Cancelled => RetryError::Cancelled,
    }
  }
}

/// Result of [`with_fallback`]. Never an `Err`: failures carry the fallback data.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
  Success {
    data: T,
  },
  Failure {
    error: RetryError<E>,
    /// Catalog dataset for the data type, if there is one
    fallback: Option<T>,
  },
}

impl<T, E> RetryOutcome<T, E> {
  pub fn is_success(&self) -> bool {
    matches!(self, RetryOutcome::Success { .. })
  }

  /// True on every failure: the caller should continue to the cache and catalog tiers.
  pub fn should_use_fallback(&self) -> bool {
    !self.is_success()
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      RetryOutcome::Success { data } => Some(data),
      RetryOutcome::Failure { .. } => None,
    }
  }

  pub fn map_err<F, G: FnOnce(E) -> F>(self, f: G) -> RetryOutcome<T, F> {
    match self {
      RetryOutcome::Success { data } => RetryOutcome::Success { data },
      RetryOutcome::Failure { error, fallback } => RetryOutcome::Failure {
        error: error.map(f),
        fallback,
      },
    }
  }
}

/// Run `operation` up to `max_retries + 1` times with linear backoff.
///
/// Each attempt and each backoff sleep races `options.cancel`; a cancelled
/// attempt is dropped mid-flight. The operation is responsible for its own
/// timeout.
pub async fn with_fallback<T, E, F, Fut>(
  mut operation: F,
  data_type: &str,
  catalog: &FallbackCatalog,
  options: &RetryOptions,
) -> RetryOutcome<T, E>
where
  T: DeserializeOwned,
  E: std::fmt::Display,
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
{
  let cancel = &options.cancel;
  let mut attempt = 0;

  let error = loop {
    // Don't start an attempt once the caller is gone
    if cancel.is_cancelled() {
      break RetryError::Cancelled;
    }

    let result = tokio::select! {
      biased;
      _ = cancel.cancelled() => break RetryError::Cancelled,
      result = operation() => result,
    };

    let error = match result {
      Ok(data) => {
        if attempt > 0 {
          debug!(data_type, attempt, "Request succeeded after retry");
        }
        return RetryOutcome::Success { data };
      }
      Err(e) => e,
    };

    if attempt >= options.max_retries {
      warn!(data_type, attempts = attempt + 1, error = %error, "Request failed, using fallback");
      break RetryError::Failed(error);
    }

    let delay = options.backoff(attempt);
    debug!(data_type, attempt, ?delay, error = %error, "Request failed, retrying");

    tokio::select! {
      biased;
      _ = cancel.cancelled() => break RetryError::Cancelled,
      _ = tokio::time::sleep(delay) => {}
    }

    attempt += 1;
  };

  if error.is_cancelled() {
    debug!(data_type, "Request cancelled");
  }

  RetryOutcome::Failure {
    error,
    fallback: catalog.lookup_as(data_type),
  }
}
