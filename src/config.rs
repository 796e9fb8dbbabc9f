use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::download::FailurePolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the notes API (e.g. "https://notes.example.com/api")
  pub url: String,
  /// Per-request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Database location (defaults to $XDG_DATA_HOME/notelab/offline.db)
  pub path: Option<PathBuf>,
  /// Maximum number of unit fetches in flight per download
  #[serde(default = "default_concurrency")]
  pub concurrency: usize,
  /// What to do when some units of a subject fail to download
  #[serde(default)]
  pub failure_policy: FailurePolicy,
  /// Extra attempts per failed unit
  #[serde(default)]
  pub max_retries: u32,
}

fn default_concurrency() -> usize {
  4
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      path: None,
      concurrency: default_concurrency(),
      failure_policy: FailurePolicy::default(),
      max_retries: 0,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./notelab.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/notelab/config.yaml
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
        "No configuration file found. Create one at ~/.config/notelab/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("notelab.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("notelab").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let mut config: Config = serde_yaml::from_str(contents)?;
    config.cache.concurrency = config.cache.concurrency.max(1);
    Ok(config)
  }

  /// Get the API token from the environment, if any.
  ///
  /// Session bootstrapping happens elsewhere; the cache only forwards the token.
  pub fn get_api_token() -> Option<String> {
    std::env::var("NOTELAB_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}
