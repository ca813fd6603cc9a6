//! Gateway that orchestrates caching and queuing around the transport.

use chrono::Duration;
use reqwest::Method;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connectivity::ConnectivityProbe;
use crate::store::{ActionType, PendingAction, Store};

use super::hooks::RequestHook;
use super::transport::{Transport, TransportError};
use super::types::{ApiRequest, ApiResponse};

/// Errors surfaced to gateway callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
  /// Unreachable, with nothing cached to serve or no queue to accept the write.
  #[error("offline: {0}")]
  Offline(String),

  /// The server answered with a failure. Never masked by the cache.
  #[error("server returned {status}: {body}")]
  Server { status: u16, body: String },

  #[error("request failed: {0}")]
  Request(String),
}

impl GatewayError {
  pub fn is_offline(&self) -> bool {
    matches!(self, Self::Offline(_))
  }
}

impl From<TransportError> for GatewayError {
  fn from(e: TransportError) -> Self {
    match e {
      TransportError::Connectivity(msg) => Self::Offline(msg),
      TransportError::Status { status, body } => Self::Server { status, body },
      TransportError::Request(msg) => Self::Request(msg),
    }
  }
}

/// Derive the cache key for a request.
///
/// SHA256 of `METHOD:path` for stable, fixed-length keys.
pub fn derive_cache_key(method: &Method, path: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(format!("{}:{}", method, path.trim()).as_bytes());
  hex::encode(hasher.finalize())
}

/// Request gateway with transparent caching and offline queuing.
///
/// Connectivity is the single branch point: while online every answer from the
/// server (good or bad) goes straight back to the caller. Only when offline do
/// reads fall back to the cache and writes go to the pending queue.
pub struct Gateway<T: Transport> {
  transport: Arc<T>,
  store: Arc<dyn Store>,
  probe: Arc<dyn ConnectivityProbe>,
  hooks: Vec<Arc<dyn RequestHook>>,
  /// How long a cached read stays servable
  ttl: Duration,
}

impl<T: Transport> Gateway<T> {
  pub fn new(transport: Arc<T>, store: Arc<dyn Store>, probe: Arc<dyn ConnectivityProbe>) -> Self {
    Self {
      transport,
      store,
      probe,
      hooks: Vec::new(),
      ttl: Duration::minutes(5),
    }
  }

  /// Set the freshness window for cached reads.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Add a pre-request hook. Hooks run in registration order.
  pub fn with_hook(mut self, hook: Arc<dyn RequestHook>) -> Self {
    self.hooks.push(hook);
    self
  }

  pub fn transport(&self) -> Arc<T> {
    Arc::clone(&self.transport)
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    &self.store
  }

  pub fn is_online(&self) -> bool {
    self.probe.is_online()
  }

  /// Dispatch on the verb: GET goes through [`Self::read`], the rest through [`Self::write`].
  pub async fn send(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
  ) -> Result<ApiResponse, GatewayError> {
    if method == Method::GET {
      self.read(path).await
    } else {
      self.write(method, path, body).await
    }
  }

  /// Read a resource, falling back to the cache when offline.
  pub async fn read(&self, path: &str) -> Result<ApiResponse, GatewayError> {
    let request = self.prepare(Method::GET, path, None);
    let key = derive_cache_key(&request.method, &request.path);

    if !self.probe.is_online() {
      debug!(path, "offline, skipping network for read");
      return self.cached_or(&key, GatewayError::Offline(format!("GET {}", path)));
    }

    match self.transport.send(&request).await {
      Ok(response) => {
        if let Err(e) = self.store.set_with_ttl(&key, &response.body, self.ttl) {
          warn!(path, error = %e, "failed to cache response");
        }
        Ok(ApiResponse::from_network(response.status, response.body))
      }
      Err(e) if e.is_connectivity() => {
        debug!(path, error = %e, "read failed while unreachable, trying cache");
        self.cached_or(&key, e.into())
      }
      Err(e) => Err(e.into()),
    }
  }

  /// Send a mutation, queuing it when offline.
  pub async fn write(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
  ) -> Result<ApiResponse, GatewayError> {
    if ActionType::from_method(&method).is_none() {
      return Err(GatewayError::Request(format!("{} is not a write", method)));
    }

    let request = self.prepare(method, path, body);

    if !self.probe.is_online() {
      debug!(method = %request.method, path, "offline, queuing write");
      let err = GatewayError::Offline(format!("{} {}", request.method, path));
      return self.enqueue(&request, err);
    }

    match self.transport.send(&request).await {
      Ok(response) => Ok(ApiResponse::from_network(response.status, response.body)),
      Err(e) if e.is_connectivity() => {
        debug!(method = %request.method, path, error = %e, "write failed while unreachable");
        self.enqueue(&request, e.into())
      }
      Err(e) => Err(e.into()),
    }
  }

  /// Re-issue a queued action. No cache or queue fallback.
  pub async fn replay(&self, action: &PendingAction) -> Result<ApiResponse, GatewayError> {
    let request = self.prepare(action.http_method(), &action.url, action.data.clone());
    let response = self.transport.send(&request).await?;
    Ok(ApiResponse::from_network(response.status, response.body))
  }

  fn prepare(&self, method: Method, path: &str, body: Option<Value>) -> ApiRequest {
    let mut request = ApiRequest::new(method, path, body);
    for hook in &self.hooks {
      hook.before_request(&mut request);
    }
    request
  }

  fn cached_or(&self, key: &str, err: GatewayError) -> Result<ApiResponse, GatewayError> {
    match self.store.get_entry(key) {
      Ok(Some(entry)) => Ok(ApiResponse::from_cache(entry.data, entry.timestamp)),
      Ok(None) => Err(err),
      Err(e) => {
        warn!(error = %e, "cache unavailable");
        Err(err)
      }
    }
  }

  fn enqueue(&self, request: &ApiRequest, err: GatewayError) -> Result<ApiResponse, GatewayError> {
    match self
      .store
      .queue_request(&request.method, &request.path, request.body.as_ref())
    {
      Ok(id) => {
        info!(%id, method = %request.method, path = %request.path, "queued write for replay");
        Ok(ApiResponse::queued(id))
      }
      Err(e) => {
        warn!(error = %e, "pending queue unavailable");
        Err(err)
      }
    }
  }
}

impl<T: Transport> Clone for Gateway<T> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      store: Arc::clone(&self.store),
      probe: Arc::clone(&self.probe),
      hooks: self.hooks.clone(),
      ttl: self.ttl,
    }
  }
}
