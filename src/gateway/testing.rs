//! Scripted transport for unit tests.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::transport::{Transport, TransportError, TransportResponse};
use super::types::ApiRequest;

/// Records every request and answers from a script.
///
/// Unscripted paths succeed: the request body is echoed back, or
/// `{"path": ...}` for body-less requests.
#[derive(Default)]
pub struct FakeTransport {
  calls: Mutex<Vec<ApiRequest>>,
  failures: Mutex<HashMap<String, TransportError>>,
  responses: Mutex<HashMap<String, Value>>,
  unreachable: AtomicBool,
}

impl FakeTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every request fail as if the network were down.
  pub fn set_unreachable(&self, unreachable: bool) {
    self.unreachable.store(unreachable, Ordering::SeqCst);
  }

  pub fn fail_path(&self, path: &str, error: TransportError) {
    self.failures.lock().unwrap().insert(path.to_string(), error);
  }

  pub fn respond(&self, path: &str, body: Value) {
    self.responses.lock().unwrap().insert(path.to_string(), body);
  }

  /// Requests seen so far as "METHOD path".
  pub fn calls(&self) -> Vec<String> {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .map(|r| format!("{} {}", r.method, r.path))
      .collect()
  }

  pub fn requests(&self) -> Vec<ApiRequest> {
    self.calls.lock().unwrap().clone()
  }
}

impl Transport for FakeTransport {
  async fn send(&self, request: &ApiRequest) -> Result<TransportResponse, TransportError> {
    self.calls.lock().unwrap().push(request.clone());

    if self.unreachable.load(Ordering::SeqCst) {
      return Err(TransportError::Connectivity("network unreachable".to_string()));
    }
    if let Some(error) = self.failures.lock().unwrap().get(&request.path) {
      return Err(error.clone());
    }

    let body = self
      .responses
      .lock()
      .unwrap()
      .get(&request.path)
      .cloned()
      .or_else(|| request.body.clone())
      .unwrap_or_else(|| json!({ "path": request.path }));

    Ok(TransportResponse { status: 200, body })
  }
}

/// Shorthand for a 500 from the server.
pub fn server_error() -> TransportError {
  TransportError::Status {
    status: 500,
    body: "internal error".to_string(),
  }
}
