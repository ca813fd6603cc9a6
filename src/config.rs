use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::gateway::Auth;

/// Largest accepted `cache.ttl_minutes`, 100 years.
pub const MAX_TTL_MINUTES: i64 = 100 * 365 * 24 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
  /// No credentials attached
  #[default]
  None,
  /// Bearer token from the environment
  Bearer,
  /// Basic auth: `username` plus the token as password
  Basic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  #[serde(default)]
  pub auth_type: AuthType,
  pub username: Option<String>,
  /// Context headers attached to every request (e.g. a tenant id)
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// How long a cached read stays servable while offline
  #[serde(default = "default_ttl_minutes")]
  pub ttl_minutes: i64,
  /// Store location (defaults to the user data directory)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_minutes: default_ttl_minutes(),
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
  /// Queue depth polling interval
  #[serde(default = "default_poll_interval_secs")]
  pub poll_interval_secs: u64,
  /// Path probed to decide whether the server is reachable
  #[serde(default = "default_health_path")]
  pub health_path: String,
  #[serde(default = "default_probe_interval_secs")]
  pub probe_interval_secs: u64,
  /// Replay the leftover queue when the monitor starts online
  #[serde(default = "default_true")]
  pub sync_on_start: bool,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      poll_interval_secs: default_poll_interval_secs(),
      health_path: default_health_path(),
      probe_interval_secs: default_probe_interval_secs(),
      sync_on_start: true,
    }
  }
}

fn default_timeout_secs() -> u64 {
  15
}

fn default_ttl_minutes() -> i64 {
  5
}

fn default_poll_interval_secs() -> u64 {
  30
}

fn default_health_path() -> String {
  "/".to_string()
}

fn default_probe_interval_secs() -> u64 {
  10
}

fn default_true() -> bool {
  true
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.cache.ttl_minutes <= 0 {
      return Err(eyre!("cache.ttl_minutes must be positive"));
    }
    if config.cache.ttl_minutes > MAX_TTL_MINUTES {
      return Err(eyre!("cache.ttl_minutes must be at most {}", MAX_TTL_MINUTES));
    }
    Ok(config)
  }

  /// Credentials for the configured auth type.
  pub fn auth(&self) -> Result<Option<Auth>> {
    match self.api.auth_type {
      AuthType::None => Ok(None),
      AuthType::Bearer => Ok(Some(Auth::Bearer(Self::get_api_token()?))),
      AuthType::Basic => {
        let username = self
          .api
          .username
          .clone()
          .ok_or_else(|| eyre!("api.username is required for basic auth"))?;
        Ok(Some(Auth::Basic {
          username,
          password: Self::get_api_token()?,
        }))
      }
    }
  }

  /// Get the API token from environment variables.
  ///
  /// Checks OFFSYNC_API_TOKEN first, then API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("OFFSYNC_API_TOKEN")
      .or_else(|_| std::env::var("API_TOKEN"))
      .map_err(|_| eyre!("API token not found. Set OFFSYNC_API_TOKEN or API_TOKEN environment variable."))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.monitor.poll_interval_secs.max(1))
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.monitor.probe_interval_secs.max(1))
  }
}
