//! Transport abstraction over the HTTP client.
//!
//! The gateway only needs one thing from a client: send a request and say
//! whether a failure was a connectivity problem or a real answer from the server.

use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::trace;
use url::Url;

use super::types::{ApiRequest, Auth};

/// Error type for transport operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
  /// The server couldn't be reached (DNS, refused connection, timeout).
  #[error("connection failed: {0}")]
  Connectivity(String),

  /// The server answered with a non-success status.
  #[error("server returned {status}: {body}")]
  Status { status: u16, body: String },

  /// The request couldn't be built or sent for a non-network reason.
  #[error("request failed: {0}")]
  Request(String),
}

impl TransportError {
  /// Whether this failure means we are offline, as opposed to a server answer.
  pub fn is_connectivity(&self) -> bool {
    matches!(self, Self::Connectivity(_))
  }
}

/// Successful response from the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
  pub status: u16,
  pub body: Value,
}

/// Transport trait for HTTP-like clients.
pub trait Transport: Send + Sync {
  fn send(
    &self,
    request: &ApiRequest,
  ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

/// Transport backed by reqwest.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
    let mut base_url =
      Url::parse(base_url).map_err(|e| TransportError::Request(format!("invalid base url: {}", e)))?;
    // Url::join drops the last segment unless the base ends with a slash
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| TransportError::Request(format!("failed to build http client: {}", e)))?;

    Ok(Self { client, base_url })
  }

  /// Resolve a request path against the base URL.
  pub fn url_for(&self, path: &str) -> Result<Url, TransportError> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| TransportError::Request(format!("invalid path '{}': {}", path, e)))
  }
}

impl Transport for HttpTransport {
  async fn send(&self, request: &ApiRequest) -> Result<TransportResponse, TransportError> {
    let url = self.url_for(&request.path)?;
    trace!(method = %request.method, %url, "sending request");

    let mut builder = self.client.request(request.method.clone(), url);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    builder = match &request.auth {
      Some(Auth::Bearer(token)) => builder.bearer_auth(token),
      Some(Auth::Basic { username, password }) => builder.basic_auth(username, Some(password)),
      None => builder,
    };
    if let Some(body) = &request.body {
      let bytes = serde_json::to_vec(body)
        .map_err(|e| TransportError::Request(format!("failed to serialize body: {}", e)))?;
      builder = builder.header(CONTENT_TYPE, "application/json").body(bytes);
    }

    let response = builder.send().await.map_err(classify)?;
    let status = response.status();
    let bytes = response.bytes().await.map_err(classify)?;

    if !status.is_success() {
      return Err(TransportError::Status {
        status: status.as_u16(),
        body: String::from_utf8_lossy(&bytes).into_owned(),
      });
    }

    Ok(TransportResponse {
      status: status.as_u16(),
      body: parse_body(&bytes),
    })
  }
}

/// Sort a reqwest error into connectivity vs everything else.
fn classify(e: reqwest::Error) -> TransportError {
  if e.is_connect() || e.is_timeout() {
    TransportError::Connectivity(e.to_string())
  } else if e.is_request() && e.status().is_none() {
    // Failed before any response arrived, e.g. connection reset mid-flight
    TransportError::Connectivity(e.to_string())
  } else {
    TransportError::Request(e.to_string())
  }
}

/// Decode a response body. Empty bodies become null, non-JSON bodies a string.
fn parse_body(bytes: &[u8]) -> Value {
  if bytes.iter().all(u8::is_ascii_whitespace) {
    return Value::Null;
  }
  serde_json::from_slice(bytes)
    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
