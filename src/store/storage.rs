//! Store trait and SQLite implementation.

use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::types::{ActionType, CacheEntry, PendingAction};

/// Errors raised by store operations.
///
/// Callers treat any of these as a cache miss or an unavailable queue.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("store lock poisoned")]
  LockPoisoned,

  #[error("store is closed")]
  Closed,

  #[error("store is unavailable")]
  Unavailable,

  #[error("ttl must be positive, got {0}")]
  InvalidTtl(Duration),

  #[error("ttl of {0} is too large")]
  TtlOutOfRange(String),

  #[error("{0} is not a mutating method")]
  NotAMutation(Method),

  #[error("corrupt record: {0}")]
  Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable home for the response cache and the pending mutation queue.
///
/// Every operation is atomic on its own. Nothing spans two operations: a `get`
/// followed by a `set` on the same key can interleave with another caller.
pub trait Store: Send + Sync {
  /// Write or overwrite a cache entry that expires after `ttl`.
  fn set_with_ttl(&self, key: &str, data: &Value, ttl: Duration) -> StoreResult<()>;

  /// Get the full cache entry, deleting it instead if it has expired.
  fn get_entry(&self, key: &str) -> StoreResult<Option<CacheEntry>>;

  /// Remove a cache entry. Missing keys are fine.
  fn delete(&self, key: &str) -> StoreResult<()>;

  /// Append a mutation to the queue, returning its id.
  fn queue_request(&self, method: &Method, url: &str, data: Option<&Value>) -> StoreResult<String>;

  /// All pending actions, oldest first.
  fn pending_actions(&self) -> StoreResult<Vec<PendingAction>>;

  fn pending_count(&self) -> StoreResult<usize>;

  /// Drop one pending action. Unknown ids are fine.
  fn remove_pending_action(&self, id: &str) -> StoreResult<()>;

  fn clear_pending_actions(&self) -> StoreResult<()>;

  /// Drop both the cache and the queue.
  fn clear_all(&self) -> StoreResult<()>;

  /// Release the underlying storage. Later calls fail with [`StoreError::Closed`].
  fn close(&self) -> StoreResult<()>;

  /// Write a cache entry with a TTL in minutes.
  fn set(&self, key: &str, data: &Value, ttl_minutes: i64) -> StoreResult<()> {
    let ttl = Duration::try_minutes(ttl_minutes)
      .ok_or_else(|| StoreError::TtlOutOfRange(format!("{} minutes", ttl_minutes)))?;
    self.set_with_ttl(key, data, ttl)
  }

  /// Cached data for `key`, or `None` on a miss or expiry.
  fn get(&self, key: &str) -> StoreResult<Option<Value>> {
    Ok(self.get_entry(key)?.map(|entry| entry.data))
  }

  /// Append a mutation using the action type's default verb.
  fn queue_action(
    &self,
    action_type: ActionType,
    url: &str,
    data: Option<&Value>,
  ) -> StoreResult<String> {
    self.queue_request(&action_type.default_method(), url, data)
  }
}

/// Store that keeps nothing.
/// Used when the durable store can't be opened, leaving the engine network-only.
pub struct NoopStore;

impl Store for NoopStore {
  fn set_with_ttl(&self, _key: &str, _data: &Value, _ttl: Duration) -> StoreResult<()> {
    Ok(()) // Discard
  }

  fn get_entry(&self, _key: &str) -> StoreResult<Option<CacheEntry>> {
    Ok(None) // Always miss
  }

  fn delete(&self, _key: &str) -> StoreResult<()> {
    Ok(())
  }

  fn queue_request(
    &self,
    _method: &Method,
    _url: &str,
    _data: Option<&Value>,
  ) -> StoreResult<String> {
    Err(StoreError::Unavailable)
  }

  fn pending_actions(&self) -> StoreResult<Vec<PendingAction>> {
    Ok(Vec::new())
  }

  fn pending_count(&self) -> StoreResult<usize> {
    Ok(0)
  }

  fn remove_pending_action(&self, _id: &str) -> StoreResult<()> {
    Ok(())
  }

  fn clear_pending_actions(&self) -> StoreResult<()> {
    Ok(())
  }

  fn clear_all(&self) -> StoreResult<()> {
    Ok(())
  }

  fn close(&self) -> StoreResult<()> {
    Ok(())
  }
}

/// SQLite-backed store.
pub struct SqliteStore {
  conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> StoreResult<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    info!(path = %path.display(), "opened offline store");
    Self::from_connection(conn)
  }

  /// Open the store at the default location.
  pub fn open_default() -> StoreResult<Self> {
    let path = Self::default_path().ok_or(StoreError::Unavailable)?;
    Self::open(&path)
  }

  /// Open a throwaway in-memory store.
  pub fn open_in_memory() -> StoreResult<Self> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  /// Get the default database path.
  pub fn default_path() -> Option<PathBuf> {
    let data_dir = dirs::data_dir().or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))?;
    Some(data_dir.join("offsync").join("offsync.db"))
  }

  fn from_connection(conn: Connection) -> StoreResult<Self> {
    conn.execute_batch(STORE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(Some(conn)),
    })
  }

  fn lock(&self) -> StoreResult<MutexGuard<'_, Option<Connection>>> {
    self.conn.lock().map_err(|_| StoreError::LockPoisoned)
  }

  /// Run `f` against the open connection.
  fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> StoreResult<R>) -> StoreResult<R> {
    let guard = self.lock()?;
    let conn = guard.as_ref().ok_or(StoreError::Closed)?;
    f(conn)
  }
}

/// Schema for the offline store.
const STORE_SCHEMA: &str = r#"
-- Response cache, one row per request key
CREATE TABLE IF NOT EXISTS cache (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    timestamp INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

-- Mutations waiting for replay. seq breaks timestamp ties in insertion order.
CREATE TABLE IF NOT EXISTS pending_actions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    action_type TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    data BLOB,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_actions_timestamp
    ON pending_actions(timestamp, seq);
"#;

impl Store for SqliteStore {
  fn set_with_ttl(&self, key: &str, data: &Value, ttl: Duration) -> StoreResult<()> {
    if ttl <= Duration::zero() {
      return Err(StoreError::InvalidTtl(ttl));
    }

    let now = Utc::now();
    let expires_at = now
      .checked_add_signed(ttl)
      .ok_or_else(|| StoreError::TtlOutOfRange(ttl.to_string()))?;
    let data = serde_json::to_vec(data)?;

    self.with_conn(|conn| {
      conn.execute(
        "INSERT OR REPLACE INTO cache (key, data, timestamp, expires_at)
         VALUES (?, ?, ?, ?)",
        params![key, data, now.timestamp_millis(), expires_at.timestamp_millis()],
      )?;
      Ok(())
    })
  }

  fn get_entry(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
    self.with_conn(|conn| {
      let row: Option<(Vec<u8>, i64, i64)> = conn
        .query_row(
          "SELECT data, timestamp, expires_at FROM cache WHERE key = ?",
          params![key],
          |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

      let Some((data, timestamp, expires_at)) = row else {
        return Ok(None);
      };

      let entry = CacheEntry {
        key: key.to_string(),
        data: serde_json::from_slice(&data)?,
        timestamp: from_millis(timestamp)?,
        expires_at: from_millis(expires_at)?,
      };

      if entry.is_expired_at(Utc::now()) {
        debug!(key, "cache entry expired");
        conn.execute("DELETE FROM cache WHERE key = ?", params![key])?;
        return Ok(None);
      }

      Ok(Some(entry))
    })
  }

  fn delete(&self, key: &str) -> StoreResult<()> {
    self.with_conn(|conn| {
      conn.execute("DELETE FROM cache WHERE key = ?", params![key])?;
      Ok(())
    })
  }

  fn queue_request(&self, method: &Method, url: &str, data: Option<&Value>) -> StoreResult<String> {
    let action_type =
      ActionType::from_method(method).ok_or_else(|| StoreError::NotAMutation(method.clone()))?;
    let now = Utc::now();
    let id = new_action_id(now);
    let data = data.map(serde_json::to_vec).transpose()?;

    self.with_conn(|conn| {
      conn.execute(
        "INSERT INTO pending_actions (id, action_type, method, url, data, timestamp)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
          id,
          action_type.as_str(),
          method.as_str(),
          url,
          data,
          now.timestamp_millis()
        ],
      )?;
      Ok(())
    })?;

    debug!(%id, %method, url, "queued pending action");
    Ok(id)
  }

  fn pending_actions(&self) -> StoreResult<Vec<PendingAction>> {
    self.with_conn(|conn| {
      let mut stmt = conn.prepare(
        "SELECT id, action_type, method, url, data, timestamp FROM pending_actions
         ORDER BY timestamp ASC, seq ASC",
      )?;

      let rows = stmt
        .query_map([], |row| {
          Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<Vec<u8>>>(4)?,
            row.get::<_, i64>(5)?,
          ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

      rows
        .into_iter()
        .map(|(id, action_type, method, url, data, timestamp)| -> StoreResult<PendingAction> {
          Ok(PendingAction {
            action_type: action_type.parse().map_err(StoreError::Corrupt)?,
            data: data.map(|d| serde_json::from_slice(&d)).transpose()?,
            timestamp: from_millis(timestamp)?,
            id,
            method,
            url,
          })
        })
        .collect()
    })
  }

  fn pending_count(&self) -> StoreResult<usize> {
    self.with_conn(|conn| {
      let count: i64 = conn.query_row("SELECT COUNT(*) FROM pending_actions", [], |row| row.get(0))?;
      Ok(count as usize)
    })
  }

  fn remove_pending_action(&self, id: &str) -> StoreResult<()> {
    self.with_conn(|conn| {
      conn.execute("DELETE FROM pending_actions WHERE id = ?", params![id])?;
      Ok(())
    })
  }

  fn clear_pending_actions(&self) -> StoreResult<()> {
    self.with_conn(|conn| {
      conn.execute("DELETE FROM pending_actions", [])?;
      Ok(())
    })
  }

  fn clear_all(&self) -> StoreResult<()> {
    self.with_conn(|conn| {
      conn.execute_batch(
        "BEGIN;
         DELETE FROM cache;
         DELETE FROM pending_actions;
         COMMIT;",
      )?;
      Ok(())
    })
  }

  fn close(&self) -> StoreResult<()> {
    let mut guard = self.lock()?;
    if let Some(conn) = guard.take() {
      conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
      info!("closed offline store");
    }
    Ok(())
  }
}

/// Build a pending action id: enqueue millis plus a random suffix.
fn new_action_id(now: DateTime<Utc>) -> String {
  let suffix = uuid::Uuid::new_v4().simple().to_string();
  format!("{}-{}", now.timestamp_millis(), &suffix[..9])
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
  DateTime::from_timestamp_millis(ms).ok_or_else(|| StoreError::Corrupt(format!("bad timestamp {}", ms)))
}
