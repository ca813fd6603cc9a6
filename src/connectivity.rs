//! Online/offline signal shared by the gateway and the monitor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Anything that can tell whether the process is online right now.
pub trait ConnectivityProbe: Send + Sync {
  fn is_online(&self) -> bool;
}

/// Two-state connectivity signal.
///
/// Platform mechanisms (a health probe, an OS hook, the `--offline` flag) set it;
/// the gateway reads it synchronously and the monitor subscribes to its edges.
///
/// A watch receiver only sees the latest value, so a quick online, offline,
/// online flip can look like no change at all. The offline epoch counts every
/// transition to offline and lets subscribers notice such flips.
#[derive(Clone)]
pub struct ConnectivitySignal {
  tx: Arc<watch::Sender<bool>>,
  offline_epoch: Arc<AtomicU64>,
}

impl ConnectivitySignal {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self {
      tx: Arc::new(tx),
      offline_epoch: Arc::new(AtomicU64::new(0)),
    }
  }

  /// Record the current state. Returns true if it changed.
  pub fn set_online(&self, online: bool) -> bool {
    self.tx.send_if_modified(|current| {
      if *current == online {
        return false;
      }
      if !online {
        // Bumped under the channel lock, before subscribers are woken.
        self.offline_epoch.fetch_add(1, Ordering::SeqCst);
      }
      *current = online;
      true
    })
  }

  /// Number of online to offline transitions so far.
  pub fn offline_epoch(&self) -> u64 {
    self.offline_epoch.load(Ordering::SeqCst)
  }

  /// Receiver notified on every transition.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

impl ConnectivityProbe for ConnectivitySignal {
  fn is_online(&self) -> bool {
    *self.tx.borrow()
  }
}

impl Default for ConnectivitySignal {
  fn default() -> Self {
    Self::new(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_offline_epoch_counts_only_transitions_to_offline() {
    let signal = ConnectivitySignal::new(true);
    let other = signal.clone();
    assert_eq!(signal.offline_epoch(), 0);

    other.set_online(false);
    other.set_online(false);
    assert_eq!(signal.offline_epoch(), 1);

    signal.set_online(true);
    assert_eq!(signal.offline_epoch(), 1);
    signal.set_online(false);
    signal.set_online(true);
    assert_eq!(other.offline_epoch(), 2);
  }

  #[test]
  fn test_reports_only_real_transitions() {
    let signal = ConnectivitySignal::new(true);
    assert!(signal.is_online());
    assert!(!signal.set_online(true));
    assert!(signal.set_online(false));
    assert!(!signal.is_online());
  }

  #[tokio::test]
  async fn test_clones_share_state_and_notify_subscribers() {
    let signal = ConnectivitySignal::new(false);
    let other = signal.clone();
    let mut rx = signal.subscribe();

    other.set_online(true);

    rx.changed().await.unwrap();
    assert!(*rx.borrow());
    assert!(signal.is_online());
  }
}
