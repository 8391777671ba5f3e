use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::classify::{DEFAULT_CACHEABLE, DEFAULT_NETWORK_ONLY, DEFAULT_STATIC_MARKER};
use crate::error::{Result, ShellCacheError};
use crate::push::PushConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// The application's own origin; other origins pass through
  pub origin: Url,
  /// Registration scope, relative to the origin
  #[serde(default = "default_scope")]
  pub scope: String,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Application shell, fetched on install. Must contain `offline_page`.
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
  /// Cross-origin URLs containing this marker are still intercepted
  #[serde(default = "default_static_marker")]
  pub static_marker: String,
  /// Activate right after install instead of waiting for clients to close
  #[serde(default = "default_true")]
  pub skip_waiting_on_install: bool,
  #[serde(default)]
  pub patterns: PatternsConfig,
  #[serde(default)]
  pub push: PushConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Store name prefix unique to this application
  pub prefix: String,
  /// Bumped manually per release
  pub version: String,
  /// SQLite database path (default: $XDG_DATA_HOME/shellcache/cache.db)
  pub database: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "app".to_string(),
      version: "v1.0.0".to_string(),
      database: None,
    }
  }
}

/// Regular expressions matched against the full request URL, in order
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PatternsConfig {
  pub network_only: Vec<String>,
  pub cacheable: Vec<String>,
}

impl Default for PatternsConfig {
  fn default() -> Self {
    Self {
      network_only: DEFAULT_NETWORK_ONLY.iter().map(|p| p.to_string()).collect(),
      cacheable: DEFAULT_CACHEABLE.iter().map(|p| p.to_string()).collect(),
    }
  }
}

fn default_scope() -> String {
  "/".to_string()
}

fn default_precache() -> Vec<String> {
  [
    "/",
    "/manifest.json",
    "/static/favicon.png",
    "/static/web-app-manifest-192x192.png",
    "/static/web-app-manifest-512x512.png",
    "/static/user.png",
    "/offline.html",
  ]
  .iter()
  .map(|p| p.to_string())
  .collect()
}

fn default_offline_page() -> String {
  "/offline.html".to_string()
}

fn default_static_marker() -> String {
  DEFAULT_STATIC_MARKER.to_string()
}

fn default_true() -> bool {
  true
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(ShellCacheError::Config(format!(
          "Config file not found: {}",
          p.display()
        )));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(ShellCacheError::Config(
        "No configuration file found. Create one at ~/.config/shellcache/config.yaml\n\
                 See config.example.yaml for the format."
          .into(),
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      ShellCacheError::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    Self::from_yaml(&contents).map_err(|e| {
      ShellCacheError::Config(format!("Failed to load config file {}: {}", path.display(), e))
    })
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| ShellCacheError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.origin.cannot_be_a_base() {
      return Err(ShellCacheError::Config(
        "origin must be an absolute http(s) URL".into(),
      ));
    }
    if !self.precache.contains(&self.offline_page) {
      return Err(ShellCacheError::Config(format!(
        "precache list must include the offline page {}",
        self.offline_page
      )));
    }
    if self.cache.prefix.is_empty() || self.cache.version.is_empty() {
      return Err(ShellCacheError::Config(
        "cache.prefix and cache.version must be non-empty".into(),
      ));
    }
    Ok(())
  }

  /// Absolute URL of a path under the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| ShellCacheError::Config(format!("invalid path {}: {}", path, e)))
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.cache.database {
      Some(path) => Ok(path.clone()),
      None => crate::cache::SqliteStorage::default_path(),
    }
  }
}
