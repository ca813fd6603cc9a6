//! Connectivity monitor and health probe.

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::connectivity::{ConnectivityProbe, ConnectivitySignal};
use crate::gateway::{ApiRequest, Transport};
use crate::sync::{SyncCoordinator, SyncReport};

/// What UI consumers get to see.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStatus {
  pub online: bool,
  /// Queue depth at the last poll
  pub pending: usize,
  pub last_sync: Option<SyncReport>,
  pub last_sync_at: Option<DateTime<Utc>>,
}

/// Watches the connectivity signal and keeps [`MonitorStatus`] current.
///
/// Syncs once after every offline period, including flips too quick to be seen
/// as separate watch values. Queue depth is polled on its own interval because
/// writes change it without any connectivity event.
pub struct ConnectivityMonitor<T: Transport> {
  coordinator: SyncCoordinator<T>,
  signal: ConnectivitySignal,
  poll_interval: Duration,
  sync_on_start: bool,
  status: watch::Sender<MonitorStatus>,
}

impl<T: Transport> ConnectivityMonitor<T> {
  pub fn new(coordinator: SyncCoordinator<T>, signal: ConnectivitySignal) -> Self {
    let (status, _rx) = watch::channel(MonitorStatus {
      online: signal.is_online(),
      ..MonitorStatus::default()
    });
    Self {
      coordinator,
      signal,
      poll_interval: Duration::from_secs(30),
      sync_on_start: true,
      status,
    }
  }

  pub fn with_poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = interval;
    self
  }

  /// Whether to drain the queue at startup when already online.
  pub fn with_sync_on_start(mut self, sync_on_start: bool) -> Self {
    self.sync_on_start = sync_on_start;
    self
  }

  pub fn subscribe(&self) -> watch::Receiver<MonitorStatus> {
    self.status.subscribe()
  }

  pub fn status(&self) -> MonitorStatus {
    self.status.borrow().clone()
  }

  /// Run until `shutdown` resolves or the signal goes away.
  pub async fn run(&self, shutdown: impl Future<Output = ()>) {
    tokio::pin!(shutdown);

    let mut online_rx = self.signal.subscribe();
    let mut was_online = *online_rx.borrow_and_update();
    let mut ticker = tokio::time::interval(self.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Offline epoch covered by the last sync. `None` until the first time the
    // monitor is online.
    let mut synced_epoch = was_online.then(|| self.signal.offline_epoch());

    self.publish_online(was_online);
    if was_online && self.sync_on_start {
      self.run_sync().await;
    }

    loop {
      tokio::select! {
        _ = &mut shutdown => {
          debug!("monitor shutting down");
          break;
        }
        changed = online_rx.changed() => {
          if changed.is_err() {
            break;
          }
          let online = *online_rx.borrow_and_update();
          self.publish_online(online);
          if was_online && !online {
            info!("connectivity lost");
          }
          was_online = online;
          self.sync_if_reconnected(&mut synced_epoch).await;
        }
        _ = ticker.tick() => {
          self.sync_if_reconnected(&mut synced_epoch).await;
          self.poll_pending();
        }
      }
    }
  }

  /// Sync once per offline period, as soon as the signal reads online again.
  ///
  /// Compares offline epochs rather than watch values, so an offline period
  /// that came and went between two wakeups still triggers a sync.
  async fn sync_if_reconnected(&self, synced_epoch: &mut Option<u64>) {
    let epoch = self.signal.offline_epoch();
    if !self.signal.is_online() || *synced_epoch == Some(epoch) {
      return;
    }
    *synced_epoch = Some(epoch);
    info!(epoch, "connectivity restored");
    self.run_sync().await;
  }

  async fn run_sync(&self) {
    match self.coordinator.sync().await {
      Ok(report) => self.status.send_modify(|status| {
        status.last_sync = Some(report);
        status.last_sync_at = Some(Utc::now());
      }),
      Err(e) => warn!(error = %e, "sync failed"),
    }
    self.poll_pending();
  }

  fn publish_online(&self, online: bool) {
    self.status.send_if_modified(|status| {
      let changed = status.online != online;
      status.online = online;
      changed
    });
  }

  fn poll_pending(&self) {
    match self.coordinator.gateway().store().pending_count() {
      Ok(pending) => {
        self.status.send_if_modified(|status| {
          let changed = status.pending != pending;
          status.pending = pending;
          changed
        });
      }
      Err(e) => warn!(error = %e, "failed to read queue depth"),
    }
  }
}

/// Feeds the connectivity signal by polling a health endpoint.
///
/// Any answer from the server, even an error status, counts as online.
pub struct HealthProbe<T: Transport> {
  transport: Arc<T>,
  signal: ConnectivitySignal,
  path: String,
  interval: Duration,
}

impl<T: Transport> HealthProbe<T> {
  pub fn new(transport: Arc<T>, signal: ConnectivitySignal, path: &str, interval: Duration) -> Self {
    Self {
      transport,
      signal,
      path: path.to_string(),
      interval,
    }
  }

  /// Probe once and update the signal. Returns the observed state.
  pub async fn check(&self) -> bool {
    let request = ApiRequest::new(Method::GET, &self.path, None);
    let online = match self.transport.send(&request).await {
      Ok(_) => true,
      Err(e) => !e.is_connectivity(),
    };
    if self.signal.set_online(online) {
      debug!(online, "connectivity changed");
    }
    online
  }

  /// Probe on an interval until `shutdown` resolves.
  pub async fn run(&self, shutdown: impl Future<Output = ()>) {
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        _ = &mut shutdown => break,
        _ = ticker.tick() => {
          self.check().await;
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::gateway::testing::{server_error, FakeTransport};
  use crate::gateway::Gateway;
  use crate::store::{ActionType, SqliteStore, Store};
  use tokio::sync::oneshot;

  struct Fixture {
    transport: Arc<FakeTransport>,
    store: Arc<dyn Store>,
    signal: ConnectivitySignal,
    monitor: ConnectivityMonitor<FakeTransport>,
  }

  fn fixture(online: bool) -> Fixture {
    let transport = Arc::new(FakeTransport::new());
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let signal = ConnectivitySignal::new(online);
    let gateway = Gateway::new(transport.clone(), store.clone(), Arc::new(signal.clone()));
    let monitor = ConnectivityMonitor::new(SyncCoordinator::new(gateway), signal.clone())
      .with_poll_interval(Duration::from_millis(10));
    Fixture {
      transport,
      store,
      signal,
      monitor,
    }
  }

  async fn wait_for(
    rx: &mut watch::Receiver<MonitorStatus>,
    pred: impl Fn(&MonitorStatus) -> bool,
  ) -> MonitorStatus {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| pred(s)))
      .await
      .expect("timed out waiting for monitor status")
      .unwrap()
      .clone()
  }

  #[tokio::test]
  async fn test_syncs_when_connectivity_returns() {
    let f = fixture(false);
    f.store.queue_action(ActionType::Create, "/a", None).unwrap();
    f.store.queue_action(ActionType::Update, "/b", None).unwrap();
    let mut rx = f.monitor.subscribe();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let driver = async {
      wait_for(&mut rx, |s| !s.online && s.pending == 2).await;
      assert!(f.transport.calls().is_empty());

      f.signal.set_online(true);
      let status = wait_for(&mut rx, |s| s.last_sync.is_some() && s.pending == 0).await;
      assert_eq!(status.last_sync, Some(SyncReport { success: 2, failed: 0 }));
      assert!(status.online);
      assert_eq!(status.pending, 0);
      let _ = stop_tx.send(());
    };

    tokio::join!(
      f.monitor.run(async {
        let _ = stop_rx.await;
      }),
      driver
    );

    assert_eq!(f.transport.calls(), vec!["POST /a", "PUT /b"]);
  }

  #[tokio::test]
  async fn test_going_offline_does_not_sync() {
    let f = fixture(true);
    let monitor = ConnectivityMonitor::new(f.monitor.coordinator.clone(), f.signal.clone())
      .with_poll_interval(Duration::from_millis(10))
      .with_sync_on_start(false);
    f.store.queue_action(ActionType::Create, "/a", None).unwrap();
    let mut rx = monitor.subscribe();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let driver = async {
      wait_for(&mut rx, |s| s.pending == 1).await;
      f.signal.set_online(false);
      wait_for(&mut rx, |s| !s.online).await;
      let _ = stop_tx.send(());
    };

    tokio::join!(
      monitor.run(async {
        let _ = stop_rx.await;
      }),
      driver
    );

    assert!(f.transport.calls().is_empty());
    assert_eq!(monitor.status().last_sync, None);
  }

  #[tokio::test]
  async fn test_quick_offline_flip_still_syncs_queued_writes() {
    let f = fixture(true);
    let monitor = ConnectivityMonitor::new(f.monitor.coordinator.clone(), f.signal.clone())
      .with_poll_interval(Duration::from_millis(10))
      .with_sync_on_start(false);
    let mut rx = monitor.subscribe();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let driver = async {
      wait_for(&mut rx, |s| s.online && s.pending == 0).await;

      // No await point between the two transitions, so the monitor only ever
      // observes the final value.
      f.signal.set_online(false);
      let queued = monitor
        .coordinator
        .gateway()
        .write(Method::POST, "/x", None)
        .await
        .unwrap();
      assert!(queued.is_queued());
      f.signal.set_online(true);

      let status = wait_for(&mut rx, |s| s.last_sync.is_some() && s.pending == 0).await;
      assert_eq!(status.last_sync, Some(SyncReport { success: 1, failed: 0 }));
      let _ = stop_tx.send(());
    };

    tokio::join!(
      monitor.run(async {
        let _ = stop_rx.await;
      }),
      driver
    );

    assert_eq!(f.transport.calls(), vec!["POST /x"]);
    assert_eq!(f.store.pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_each_offline_period_gets_its_own_sync() {
    let f = fixture(false);
    let mut rx = f.monitor.subscribe();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let driver = async {
      f.store.queue_action(ActionType::Create, "/a", None).unwrap();
      f.signal.set_online(true);
      wait_for(&mut rx, |s| s.last_sync.is_some() && s.pending == 0).await;

      f.signal.set_online(false);
      f.store.queue_action(ActionType::Create, "/b", None).unwrap();
      f.signal.set_online(true);
      wait_for(&mut rx, |s| s.pending == 0 && f.transport.calls().len() == 2).await;
      let _ = stop_tx.send(());
    };

    tokio::join!(
      f.monitor.run(async {
        let _ = stop_rx.await;
      }),
      driver
    );

    assert_eq!(f.transport.calls(), vec!["POST /a", "POST /b"]);
  }

  #[tokio::test]
  async fn test_drains_leftover_queue_on_start() {
    let f = fixture(true);
    f.store.queue_action(ActionType::Delete, "/a", None).unwrap();
    let mut rx = f.monitor.subscribe();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let driver = async {
      let status = wait_for(&mut rx, |s| s.last_sync.is_some()).await;
      assert_eq!(status.last_sync, Some(SyncReport { success: 1, failed: 0 }));
      let _ = stop_tx.send(());
    };

    tokio::join!(
      f.monitor.run(async {
        let _ = stop_rx.await;
      }),
      driver
    );

    assert_eq!(f.store.pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_queue_depth_is_polled_without_connectivity_events() {
    let f = fixture(false);
    let mut rx = f.monitor.subscribe();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let driver = async {
      f.store.queue_action(ActionType::Create, "/a", None).unwrap();
      wait_for(&mut rx, |s| s.pending == 1).await;
      f.store.queue_action(ActionType::Create, "/b", None).unwrap();
      wait_for(&mut rx, |s| s.pending == 2).await;
      let _ = stop_tx.send(());
    };

    tokio::join!(
      f.monitor.run(async {
        let _ = stop_rx.await;
      }),
      driver
    );
  }

  #[tokio::test]
  async fn test_health_probe_tracks_reachability() {
    let transport = Arc::new(FakeTransport::new());
    let signal = ConnectivitySignal::new(true);
    let probe = HealthProbe::new(transport.clone(), signal.clone(), "/health", Duration::from_secs(1));

    transport.set_unreachable(true);
    assert!(!probe.check().await);
    assert!(!signal.is_online());

    transport.set_unreachable(false);
    transport.fail_path("/health", server_error());
    assert!(probe.check().await);
    assert!(signal.is_online());
  }
}
