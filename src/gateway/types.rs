use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

/// Credentials attached to an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
  Bearer(String),
  Basic { username: String, password: String },
}

/// An outbound API call, before hooks have run.
#[derive(Debug, Clone)]
pub struct ApiRequest {
  pub method: Method,
  /// Path relative to the API base URL, with any query string
  pub path: String,
  pub body: Option<Value>,
  pub headers: Vec<(String, String)>,
  pub auth: Option<Auth>,
}

impl ApiRequest {
  pub fn new(method: Method, path: &str, body: Option<Value>) -> Self {
    Self {
      method,
      path: path.to_string(),
      body,
      headers: Vec::new(),
      auth: None,
    }
  }

  /// Set a header, replacing any earlier value with the same name.
  pub fn set_header(&mut self, name: &str, value: &str) {
    self
      .headers
      .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
    self.headers.push((name.to_string(), value.to_string()));
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
      .map(|(_, value)| value.as_str())
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ResponseSource {
  /// Fresh data from the server
  Network,
  /// Served from the local cache because the server was unreachable
  Cache { cached_at: DateTime<Utc> },
  /// Write accepted into the pending queue for later replay
  Queued { action_id: String },
}

/// Response handed back to callers, real or synthesized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
  pub status: u16,
  pub data: Value,
  #[serde(flatten)]
  pub source: ResponseSource,
}

/// Status used for writes accepted into the queue.
pub const QUEUED_STATUS: u16 = 202;

impl ApiResponse {
  pub fn from_network(status: u16, data: Value) -> Self {
    Self {
      status,
      data,
      source: ResponseSource::Network,
    }
  }

  pub fn from_cache(data: Value, cached_at: DateTime<Utc>) -> Self {
    Self {
      status: 200,
      data,
      source: ResponseSource::Cache { cached_at },
    }
  }

  pub fn queued(action_id: String) -> Self {
    Self {
      status: QUEUED_STATUS,
      data: Value::Null,
      source: ResponseSource::Queued { action_id },
    }
  }

  pub fn is_from_cache(&self) -> bool {
    matches!(self.source, ResponseSource::Cache { .. })
  }

  pub fn is_queued(&self) -> bool {
    matches!(self.source, ResponseSource::Queued { .. })
  }
}
