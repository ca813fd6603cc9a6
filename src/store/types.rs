//! Records held by the persistent store.

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A cached response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  /// Cache key, derived from the request method and path
  pub key: String,
  /// The cached payload
  pub data: Value,
  /// When the entry was written
  pub timestamp: DateTime<Utc>,
  /// When the entry stops being served. Always later than `timestamp`.
  pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Whether the entry is past its expiry at `now`.
  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }
}

/// Kind of mutation held in the pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
  Create,
  Update,
  Delete,
}

impl ActionType {
  /// Map an HTTP verb onto an action type.
  ///
  /// Returns `None` for verbs that don't mutate anything (GET, HEAD, ...).
  pub fn from_method(method: &Method) -> Option<Self> {
    match *method {
      Method::POST => Some(Self::Create),
      Method::PUT | Method::PATCH => Some(Self::Update),
      Method::DELETE => Some(Self::Delete),
      _ => None,
    }
  }

  /// The verb used when only the action type is known.
  pub fn default_method(self) -> Method {
    match self {
      Self::Create => Method::POST,
      Self::Update => Method::PUT,
      Self::Delete => Method::DELETE,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Create => "CREATE",
      Self::Update => "UPDATE",
      Self::Delete => "DELETE",
    }
  }
}

impl fmt::Display for ActionType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ActionType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "CREATE" => Ok(Self::Create),
      "UPDATE" => Ok(Self::Update),
      "DELETE" => Ok(Self::Delete),
      other => Err(format!("unknown action type '{}'", other)),
    }
  }
}

/// A mutation waiting to be replayed against the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
  /// Enqueue instant in milliseconds plus a random suffix
  pub id: String,
  pub action_type: ActionType,
  /// The exact HTTP verb of the original request
  pub method: String,
  /// Resource path the mutation targets
  pub url: String,
  /// Request body, absent for deletes
  pub data: Option<Value>,
  /// Enqueue instant; replay order follows it
  pub timestamp: DateTime<Utc>,
}

impl PendingAction {
  /// The verb to replay with.
  ///
  /// Falls back to the action type's default verb if the recorded one can't be parsed.
  pub fn http_method(&self) -> Method {
    Method::from_bytes(self.method.as_bytes()).unwrap_or_else(|_| self.action_type.default_method())
  }
}
