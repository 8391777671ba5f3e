//! Error types for the interception agent.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShellCacheError {
  /// Precache population was incomplete; the agent must not activate.
  #[error("Precache failed for {url}: {reason}")]
  Provisioning { url: String, reason: String },

  /// Transport-level failure talking to the network.
  #[error("Network error: {0}")]
  Network(String),

  /// The persistent store could not be opened, read or written.
  #[error("Store unavailable: {0}")]
  StoreUnavailable(String),

  /// No cached entry and no offline document to fall back to.
  #[error("No fallback available for {url} ({cause})")]
  NoFallback { url: String, cause: String },

  #[error("Invalid lifecycle transition: {0}")]
  Lifecycle(String),

  #[error("Invalid request: {0}")]
  InvalidRequest(String),

  #[error("Configuration error: {0}")]
  Config(String),
}

impl ShellCacheError {
  pub fn is_network(&self) -> bool {
    matches!(self, ShellCacheError::Network(_))
  }
}

impl From<rusqlite::Error> for ShellCacheError {
  fn from(e: rusqlite::Error) -> Self {
    ShellCacheError::StoreUnavailable(e.to_string())
  }
}

impl From<serde_json::Error> for ShellCacheError {
  fn from(e: serde_json::Error) -> Self {
    ShellCacheError::StoreUnavailable(format!("corrupt entry: {}", e))
  }
}

impl From<reqwest::Error> for ShellCacheError {
  fn from(e: reqwest::Error) -> Self {
    ShellCacheError::Network(e.to_string())
  }
}

pub type Result<T> = std::result::Result<T, ShellCacheError>;
