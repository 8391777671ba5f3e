//! Result types shared by the strategies.

use chrono::{DateTime, Utc};

use crate::net::Response;

/// A response produced by a strategy, with metadata about where it came from.
#[derive(Debug, Clone)]
pub struct Served {
  /// The response handed back to the application
  pub response: Response,
  /// Where the response came from
  pub source: ResponseSource,
  /// When the response was stored (if it came from a store)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(response: Response, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Network failed, serving the runtime store's copy.
  pub fn offline(response: Response, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: ResponseSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Network failed on a navigation, serving the offline document.
  pub fn offline_page(response: Response, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: ResponseSource::OfflinePage,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// Precache hit (cache-first); a background refresh was started
  Cache,
  /// Runtime store copy served because the network failed
  Offline,
  /// Offline fallback document
  OfflinePage,
}

/// Outcome of a background cache-first refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshEvent {
  /// Entry overwritten with the fresh response
  Updated { url: String },
  /// Network answered but the response was not storable
  Skipped { url: String, status: u16 },
  /// The store was deleted while the refresh was in flight
  Discarded { url: String },
  /// Network or store failure; the cached copy is unchanged
  Failed { url: String, error: String },
}
