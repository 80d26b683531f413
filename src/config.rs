use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::query::{FetchPolicy, QueryOptions};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub cache: CacheConfig,
  pub logging: LoggingConfig,
  pub shell: ShellConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// How long a fetched value stays fresh
  pub default_ttl_secs: u64,
  /// Auto-refresh period for screens that opt in
  pub refresh_interval_secs: u64,
  /// Key prefixes swept when the app returns to the foreground
  pub high_priority_prefixes: Vec<String>,
  /// Upper bound on a single fetch; null disables the bound
  pub fetch_timeout_secs: Option<u64>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      default_ttl_secs: 300,
      refresh_interval_secs: 300,
      high_priority_prefixes: Vec::new(),
      fetch_timeout_secs: Some(30),
    }
  }
}

impl CacheConfig {
  pub fn fetch_policy(&self) -> FetchPolicy {
    FetchPolicy {
      timeout: self.fetch_timeout_secs.map(Duration::from_secs),
    }
  }

  /// Options for an auto-refreshing screen.
  pub fn query_options(&self) -> QueryOptions {
    QueryOptions::default()
      .with_ttl(Duration::from_secs(self.default_ttl_secs))
      .with_auto_refresh(Duration::from_secs(self.refresh_interval_secs))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Filter directive used when RUST_LOG is unset (e.g. "info", "portal_cache=debug")
  pub level: String,
  /// Write daily-rolling log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "warn".to_string(),
      directory: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
  /// How often open screens are checked for state changes
  pub tick_rate_ms: u64,
  /// Artificial delay of the simulated remote store
  pub latency_ms: u64,
}

impl Default for ShellConfig {
  fn default() -> Self {
    Self {
      tick_rate_ms: 250,
      latency_ms: 400,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./portal-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/portal-cache/config.yaml
  ///
  /// Falls back to defaults when no file is found.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("portal-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("portal-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.cache.default_ttl_secs == 0 {
      return Err(eyre!("cache.default_ttl_secs must be greater than zero"));
    }
    if config.shell.tick_rate_ms == 0 {
      return Err(eyre!("shell.tick_rate_ms must be greater than zero"));
    }
    Ok(config)
  }
}
