//! Replays queued mutations once the server is reachable again.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::gateway::{Gateway, Transport};
use crate::store::StoreError;

/// Tally of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  pub success: usize,
  pub failed: usize,
}

/// Replays the pending queue through the gateway.
///
/// Actions go out one at a time in enqueue order, each awaited before the next,
/// since later mutations can depend on earlier ones (create then update).
/// Delivery is at-least-once: if the reply to an applied mutation is lost, it
/// stays queued and is sent again on the next pass.
pub struct SyncCoordinator<T: Transport> {
  gateway: Gateway<T>,
  /// Held for the length of a pass so two passes never replay the same action
  pass: Arc<Mutex<()>>,
}

impl<T: Transport> SyncCoordinator<T> {
  pub fn new(gateway: Gateway<T>) -> Self {
    Self {
      gateway,
      pass: Arc::new(Mutex::new(())),
    }
  }

  /// Replay every pending action.
  ///
  /// Succeeded actions are removed; failed ones stay for the next pass and only
  /// show up in the tally. Only store failures abort the pass.
  pub async fn sync(&self) -> Result<SyncReport, StoreError> {
    let _pass = self.pass.lock().await;
    let store = self.gateway.store();

    let actions = store.pending_actions()?;
    if actions.is_empty() {
      debug!("nothing to sync");
      return Ok(SyncReport::default());
    }

    info!(count = actions.len(), "replaying pending actions");
    let mut report = SyncReport::default();

    for action in &actions {
      match self.gateway.replay(action).await {
        Ok(_) => {
          store.remove_pending_action(&action.id)?;
          report.success += 1;
        }
        Err(e) => {
          warn!(id = %action.id, method = %action.method, url = %action.url, error = %e, "replay failed");
          report.failed += 1;
        }
      }
    }

    info!(success = report.success, failed = report.failed, "sync finished");
    Ok(report)
  }

  pub fn gateway(&self) -> &Gateway<T> {
    &self.gateway
  }
}

impl<T: Transport> Clone for SyncCoordinator<T> {
  fn clone(&self) -> Self {
    Self {
      gateway: self.gateway.clone(),
      pass: Arc::clone(&self.pass),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::connectivity::ConnectivitySignal;
  use crate::gateway::testing::{server_error, FakeTransport};
  use crate::store::{ActionType, SqliteStore, Store};
  use reqwest::Method;
  use serde_json::json;

  fn coordinator() -> (Arc<FakeTransport>, Arc<dyn Store>, SyncCoordinator<FakeTransport>) {
    let transport = Arc::new(FakeTransport::new());
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let gateway = Gateway::new(
      transport.clone(),
      store.clone(),
      Arc::new(ConnectivitySignal::new(true)),
    );
    (transport, store, SyncCoordinator::new(gateway))
  }

  #[tokio::test]
  async fn test_replays_in_enqueue_order() {
    let (transport, store, coordinator) = coordinator();
    store
      .queue_action(ActionType::Create, "/a", Some(&json!({"n": 1})))
      .unwrap();
    store.queue_request(&Method::PATCH, "/b", Some(&json!({"n": 2}))).unwrap();
    store.queue_action(ActionType::Delete, "/c", None).unwrap();

    let report = coordinator.sync().await.unwrap();

    assert_eq!(report, SyncReport { success: 3, failed: 0 });
    assert_eq!(transport.calls(), vec!["POST /a", "PATCH /b", "DELETE /c"]);
    assert_eq!(store.pending_count().unwrap(), 0);

    let bodies: Vec<_> = transport.requests().into_iter().map(|r| r.body).collect();
    assert_eq!(bodies, vec![Some(json!({"n": 1})), Some(json!({"n": 2})), None]);
  }

  #[tokio::test]
  async fn test_failed_replay_stays_queued_and_the_rest_continue() {
    let (transport, store, coordinator) = coordinator();
    store.queue_action(ActionType::Create, "/a", None).unwrap();
    let b = store.queue_action(ActionType::Update, "/b", None).unwrap();
    store.queue_action(ActionType::Delete, "/c", None).unwrap();
    transport.fail_path("/b", server_error());

    let report = coordinator.sync().await.unwrap();

    assert_eq!(report, SyncReport { success: 2, failed: 1 });
    assert_eq!(transport.calls(), vec!["POST /a", "PUT /b", "DELETE /c"]);
    let remaining = store.pending_actions().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, b);
  }

  #[tokio::test]
  async fn test_failed_action_is_retried_on_next_pass() {
    let (transport, store, coordinator) = coordinator();
    store.queue_action(ActionType::Create, "/a", None).unwrap();
    transport.set_unreachable(true);

    assert_eq!(coordinator.sync().await.unwrap(), SyncReport { success: 0, failed: 1 });
    assert_eq!(store.pending_count().unwrap(), 1);

    transport.set_unreachable(false);
    assert_eq!(coordinator.sync().await.unwrap(), SyncReport { success: 1, failed: 0 });
    assert_eq!(store.pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_empty_queue_sync_is_idempotent() {
    let (transport, _store, coordinator) = coordinator();

    assert_eq!(coordinator.sync().await.unwrap(), SyncReport::default());
    assert_eq!(coordinator.sync().await.unwrap(), SyncReport::default());
    assert!(transport.calls().is_empty());
  }

  #[tokio::test]
  async fn test_second_sync_after_full_success_sends_nothing() {
    let (transport, store, coordinator) = coordinator();
    store.queue_action(ActionType::Create, "/a", None).unwrap();

    coordinator.sync().await.unwrap();
    let report = coordinator.sync().await.unwrap();

    assert_eq!(report, SyncReport::default());
    assert_eq!(transport.calls().len(), 1);
  }

  #[tokio::test]
  async fn test_overlapping_passes_do_not_double_send() {
    let (transport, store, coordinator) = coordinator();
    store.queue_action(ActionType::Create, "/a", None).unwrap();
    store.queue_action(ActionType::Create, "/b", None).unwrap();
    let other = coordinator.clone();

    let (first, second) = tokio::join!(coordinator.sync(), other.sync());

    let total = first.unwrap().success + second.unwrap().success;
    assert_eq!(total, 2);
    assert_eq!(transport.calls(), vec!["POST /a", "POST /b"]);
  }

  #[tokio::test]
  async fn test_closed_store_fails_the_pass() {
    let (_transport, store, coordinator) = coordinator();
    store.close().unwrap();

    assert!(matches!(coordinator.sync().await, Err(StoreError::Closed)));
  }
}
