//! The engine wires store, gateway, coordinator and connectivity together.

use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, MAX_TTL_MINUTES};
use crate::connectivity::{ConnectivityProbe, ConnectivitySignal};
use crate::gateway::{
  ApiResponse, AuthHook, Gateway, GatewayError, HttpTransport, StaticHeaders, Transport,
};
use crate::monitor::{ConnectivityMonitor, HealthProbe};
use crate::store::{NoopStore, PendingAction, SqliteStore, Store, StoreResult};
use crate::sync::{SyncCoordinator, SyncReport};

/// Offline-first client engine.
///
/// One store instance is opened here and shared by handle with the gateway and
/// the coordinator. Call [`Engine::close_all`] to release it.
pub struct Engine<T: Transport = HttpTransport> {
  transport: Arc<T>,
  store: Arc<dyn Store>,
  signal: ConnectivitySignal,
  coordinator: SyncCoordinator<T>,
}

impl Engine<HttpTransport> {
  /// Build an engine from configuration.
  ///
  /// If the durable store can't be opened the engine runs network-only.
  pub fn open(config: &Config, signal: ConnectivitySignal) -> Result<Self> {
    let transport = HttpTransport::new(&config.api.base_url, config.timeout())
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let ttl = Some(config.cache.ttl_minutes)
      .filter(|minutes| (1..=MAX_TTL_MINUTES).contains(minutes))
      .and_then(Duration::try_minutes)
      .ok_or_else(|| eyre!("Invalid cache TTL: {} minutes", config.cache.ttl_minutes))?;

    let opened = match &config.cache.path {
      Some(path) => SqliteStore::open(path),
      None => SqliteStore::open_default(),
    };
    let store: Arc<dyn Store> = match opened {
      Ok(store) => Arc::new(store),
      Err(e) => {
        warn!(error = %e, "offline store unavailable, running network-only");
        Arc::new(NoopStore)
      }
    };

    let mut gateway = Gateway::new(Arc::new(transport), store, Arc::new(signal.clone())).with_ttl(ttl);
    if let Some(auth) = config.auth()? {
      gateway = gateway.with_hook(Arc::new(AuthHook::new(auth)));
    }
    if !config.api.headers.is_empty() {
      gateway = gateway.with_hook(Arc::new(StaticHeaders::new(config.api.headers.clone())));
    }

    Ok(Self::from_gateway(gateway, signal))
  }
}

impl<T: Transport> Engine<T> {
  /// Assemble an engine around an already configured gateway.
  ///
  /// `signal` must be the probe the gateway was built with.
  pub fn from_gateway(gateway: Gateway<T>, signal: ConnectivitySignal) -> Self {
    Self {
      transport: gateway.transport(),
      store: Arc::clone(gateway.store()),
      signal,
      coordinator: SyncCoordinator::new(gateway),
    }
  }

  /// Read a resource; cached data is flagged in the response source.
  pub async fn read(&self, path: &str) -> Result<ApiResponse, GatewayError> {
    self.coordinator.gateway().read(path).await
  }

  /// Send a mutation; offline writes come back as queued.
  pub async fn write(
    &self,
    method: Method,
    path: &str,
    payload: Option<Value>,
  ) -> Result<ApiResponse, GatewayError> {
    self.coordinator.gateway().write(method, path, payload).await
  }

  pub async fn sync(&self) -> StoreResult<SyncReport> {
    self.coordinator.sync().await
  }

  pub fn pending_count(&self) -> StoreResult<usize> {
    self.store.pending_count()
  }

  pub fn pending_actions(&self) -> StoreResult<Vec<PendingAction>> {
    self.store.pending_actions()
  }

  pub fn is_online(&self) -> bool {
    self.signal.is_online()
  }

  pub fn signal(&self) -> &ConnectivitySignal {
    &self.signal
  }

  /// Monitor that syncs this engine's queue on reconnect.
  pub fn monitor(&self) -> ConnectivityMonitor<T> {
    ConnectivityMonitor::new(self.coordinator.clone(), self.signal.clone())
  }

  /// Health probe feeding this engine's connectivity signal.
  pub fn health_probe(&self, path: &str, interval: std::time::Duration) -> HealthProbe<T> {
    HealthProbe::new(Arc::clone(&self.transport), self.signal.clone(), path, interval)
  }

  /// Drop the queue only, keeping cached reads.
  pub fn clear_pending(&self) -> StoreResult<()> {
    self.store.clear_pending_actions()
  }

  /// Drop cache and queue, e.g. on logout or tenant switch.
  pub fn clear_all(&self) -> StoreResult<()> {
    self.store.clear_all()
  }

  /// Tear down the engine and close the store.
  pub fn close_all(self) -> StoreResult<()> {
    self.store.close()?;
    info!("engine closed");
    Ok(())
  }
}
