//! Online/offline tracking driven by platform connectivity events.
//!
//! The status is advisory. Nothing in this crate skips a network attempt
//! because the monitor says "offline"; it only changes how degraded data is
//! labelled. The platform signal is trusted as-is, without probing.

use tokio::sync::watch;
use tracing::info;

/// A connectivity transition reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
  Online,
  Offline,
}

/// Owner of the connectivity state. Clones share the same state.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
  tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
  /// Create a monitor seeded with the platform's current status.
  pub fn new(initially_online: bool) -> Self {
    let (tx, _) = watch::channel(initially_online);
    Self { tx }
  }

  /// Apply a platform event.
  pub fn handle_event(&self, event: ConnectivityEvent) {
    self.set_online(event == ConnectivityEvent::Online);
  }

  /// Record the platform status. Subscribers are only woken on an actual change.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });

    if changed {
      info!(online, "Connectivity changed");
    }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Subscribe to status changes. Dropping the handle unsubscribes.
  pub fn subscribe(&self) -> OnlineStatus {
    OnlineStatus {
      rx: self.tx.subscribe(),
    }
  }
}

impl Default for ConnectivityMonitor {
  fn default() -> Self {
    Self::new(true)
  }
}

/// Reactive view of the connectivity state.
#[derive(Debug, Clone)]
pub struct OnlineStatus {
  rx: watch::Receiver<bool>,
}

impl OnlineStatus {
  /// Current status; always reflects the latest event.
  pub fn is_online(&self) -> bool {
    *self.rx.borrow()
  }

  /// Wait for the next transition and return the new status.
  ///
  /// Returns `None` once every monitor handle has been dropped.
  pub async fn changed(&mut self) -> Option<bool> {
    self.rx.changed().await.ok()?;
    Some(*self.rx.borrow_and_update())
  }
}
