//! Ownership of the named, versioned stores.

use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::error::{Result, ShellCacheError};
use crate::host::Host;
use crate::net::{CacheMode, Network, Request, Response};

use super::storage::{CacheStorage, CachedEntry};

/// Naming scheme for the two logical stores: `{prefix}-{role}-{version}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNames {
  prefix: String,
  version: String,
}

impl StoreNames {
  pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      version: version.into(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  /// Shell assets, replaced wholesale on version bump
  pub fn precache(&self) -> String {
    format!("{}-cache-{}", self.prefix, self.version)
  }

  /// Populated by network-first traffic
  pub fn runtime(&self) -> String {
    format!("{}-runtime-{}", self.prefix, self.version)
  }

  pub fn current(&self) -> BTreeSet<String> {
    BTreeSet::from([self.precache(), self.runtime()])
  }

  /// Whether a store name belongs to this application.
  pub fn owns(&self, name: &str) -> bool {
    name
      .strip_prefix(&self.prefix)
      .is_some_and(|rest| rest.starts_with('-'))
  }
}

/// Handle to a single named store.
pub struct Store<S: CacheStorage> {
  name: String,
  storage: Arc<S>,
}

impl<S: CacheStorage> Store<S> {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn lookup(&self, request: &Request) -> Result<Option<CachedEntry>> {
    self.storage.get_entry(&self.name, &request.key())
  }

  /// Returns false if the store was deleted since this handle was opened.
  pub fn put(&self, request: &Request, response: &Response) -> Result<bool> {
    self.storage.put_entry(&self.name, &request.key(), response)
  }
}

impl<S: CacheStorage> Clone for Store<S> {
  fn clone(&self) -> Self {
    Self {
      name: self.name.clone(),
      storage: Arc::clone(&self.storage),
    }
  }
}

/// The only component that opens, writes or deletes stores.
pub struct StoreManager<S: CacheStorage> {
  storage: Arc<S>,
  names: StoreNames,
}

impl<S: CacheStorage> StoreManager<S> {
  pub fn new(storage: Arc<S>, names: StoreNames) -> Self {
    Self { storage, names }
  }

  pub fn names(&self) -> &StoreNames {
    &self.names
  }

  /// Return a handle to the named store, creating it if absent.
  pub fn open(&self, name: &str) -> Result<Store<S>> {
    self.storage.create_store(name)?;
    Ok(Store {
      name: name.to_string(),
      storage: Arc::clone(&self.storage),
    })
  }

  pub fn precache_store(&self) -> Result<Store<S>> {
    self.open(&self.names.precache())
  }

  pub fn runtime_store(&self) -> Result<Store<S>> {
    self.open(&self.names.runtime())
  }

  /// Look up an entry in the precache store without creating it.
  pub fn precache_match(&self, request: &Request) -> Result<Option<CachedEntry>> {
    self.storage.get_entry(&self.names.precache(), &request.key())
  }

  /// Application-owned store names, sorted.
  pub fn owned_stores(&self) -> Result<Vec<String>> {
    Ok(
      self
        .storage
        .store_names()?
        .into_iter()
        .filter(|name| self.names.owns(name))
        .collect(),
    )
  }

  /// Delete every application store not in `current`. Returns what was removed.
  pub fn evict_stale(&self, current: &BTreeSet<String>) -> Result<Vec<String>> {
    let mut removed = Vec::new();

    for name in self.owned_stores()? {
      if current.contains(&name) {
        continue;
      }
      // Another task may have deleted it already
      if self.storage.delete_store(&name)? {
        info!(store = %name, "Removing stale store");
        removed.push(name);
      }
    }

    Ok(removed)
  }

  /// Delete every application store regardless of version.
  pub fn clear_all(&self) -> Result<Vec<String>> {
    self.evict_stale(&BTreeSet::new())
  }

  /// Hand every open client over to this version immediately.
  pub fn claim_control(&self, host: &dyn Host) -> usize {
    let claimed = host.claim_clients();
    info!(version = %self.names.version(), claimed, "Claimed clients");
    claimed
  }

  /// Whether the precache store exists and holds every manifest entry.
  pub fn holds_manifest(&self, origin: &Url, manifest: &[String]) -> Result<bool> {
    let name = self.names.precache();
    if !self.storage.store_names()?.contains(&name) {
      return Ok(false);
    }

    for path in manifest {
      let Ok(url) = origin.join(path) else {
        return Ok(false);
      };
      if self
        .storage
        .get_entry(&name, &Request::from_url(url).key())?
        .is_none()
      {
        return Ok(false);
      }
    }

    Ok(true)
  }

  /// Fetch the whole manifest with cache-busting and store it in the precache store.
  ///
  /// Nothing is written, and the store is not created, unless every entry
  /// was fetched with a 2xx status.
  pub async fn precache<N: Network + ?Sized>(
    &self,
    network: &N,
    origin: &Url,
    manifest: &[String],
  ) -> Result<usize> {
    let requests = manifest
      .iter()
      .map(|path| {
        origin
          .join(path)
          .map(|url| Request::from_url(url).with_cache_mode(CacheMode::Reload))
          .map_err(|e| ShellCacheError::Provisioning {
            url: path.clone(),
            reason: e.to_string(),
          })
      })
      .collect::<Result<Vec<_>>>()?;

    let responses = join_all(requests.iter().map(|req| network.fetch(req))).await;

    let mut entries = Vec::with_capacity(requests.len());
    for (request, result) in requests.iter().zip(responses) {
      let response = result.map_err(|e| ShellCacheError::Provisioning {
        url: request.url.to_string(),
        reason: e.to_string(),
      })?;

      if !response.is_ok() {
        return Err(ShellCacheError::Provisioning {
          url: request.url.to_string(),
          reason: format!("HTTP {}", response.status),
        });
      }

      debug!(url = %request.url, "Precached");
      entries.push((request.key(), response));
    }

    self.storage.put_entries(&self.names.precache(), &entries)?;
    Ok(entries.len())
  }
}

impl<S: CacheStorage> Clone for StoreManager<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      names: self.names.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::host::LocalHost;
  use crate::testing::StubNetwork;

  fn manager(version: &str, storage: &Arc<SqliteStorage>) -> StoreManager<SqliteStorage> {
    StoreManager::new(Arc::clone(storage), StoreNames::new("app", version))
  }

  fn origin() -> Url {
    Url::parse("https://app.test").unwrap()
  }

  #[test]
  fn names_embed_prefix_role_and_version() {
    let names = StoreNames::new("yuia", "v1.0.0");
    assert_eq!(names.precache(), "yuia-cache-v1.0.0");
    assert_eq!(names.runtime(), "yuia-runtime-v1.0.0");
    assert!(names.owns("yuia-cache-v0.9"));
    assert!(!names.owns("yuiax-cache-v1.0.0"));
    assert!(!names.owns("other-cache-v1.0.0"));
  }

  #[test]
  fn evict_stale_keeps_current_and_foreign_stores() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    for name in ["app-cache-v1", "app-runtime-v1", "app-cache-v2", "other-cache-v1"] {
      storage.create_store(name).unwrap();
    }

    let m = manager("v2", &storage);
    m.runtime_store().unwrap();
    let removed = m.evict_stale(&m.names().current()).unwrap();

    assert_eq!(removed, vec!["app-cache-v1", "app-runtime-v1"]);
    assert_eq!(
      storage.store_names().unwrap(),
      vec!["app-cache-v2", "app-runtime-v2", "other-cache-v1"]
    );
  }

  #[test]
  fn evict_stale_twice_is_a_no_op() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    storage.create_store("app-cache-v1").unwrap();
    storage.create_store("app-cache-v2").unwrap();

    let m = manager("v2", &storage);
    let current = m.names().current();
    m.evict_stale(&current).unwrap();
    let after_first = storage.store_names().unwrap();

    assert!(m.evict_stale(&current).unwrap().is_empty());
    assert_eq!(storage.store_names().unwrap(), after_first);
  }

  #[test]
  fn clear_all_removes_every_owned_version() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let m = manager("v2", &storage);
    m.precache_store().unwrap();
    m.runtime_store().unwrap();
    storage.create_store("app-cache-v1").unwrap();
    storage.create_store("notes-cache-v1").unwrap();

    assert_eq!(m.clear_all().unwrap().len(), 3);
    assert_eq!(storage.store_names().unwrap(), vec!["notes-cache-v1"]);
  }

  #[test]
  fn claim_control_takes_over_open_clients() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (host, _events) = LocalHost::new("/");
    host.open_client("https://app.test/");
    host.open_client("https://app.test/c/1");

    let m = manager("v2", &storage);
    assert_eq!(m.claim_control(&host.for_version("v2")), 2);
    assert_eq!(host.controller().as_deref(), Some("v2"));
  }

  #[tokio::test]
  async fn precache_stores_every_manifest_entry() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = StubNetwork::new();
    network.serve("https://app.test/", Response::new(200, "shell"));
    network.serve("https://app.test/offline.html", Response::new(200, "offline"));

    let m = manager("v1", &storage);
    let manifest = vec!["/".to_string(), "/offline.html".to_string()];
    assert_eq!(m.precache(&network, &origin(), &manifest).await.unwrap(), 2);

    let store = m.precache_store().unwrap();
    let offline = Request::get("https://app.test/offline.html").unwrap();
    assert_eq!(store.lookup(&offline).unwrap().unwrap().response.body, b"offline");
    assert!(network
      .requests()
      .iter()
      .all(|r| r.cache == CacheMode::Reload));
  }

  #[tokio::test]
  async fn precache_is_all_or_nothing() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = StubNetwork::new();
    network.serve("https://app.test/", Response::new(200, "shell"));
    network.fail("https://app.test/offline.html");

    let m = manager("v1", &storage);
    let manifest = vec!["/".to_string(), "/offline.html".to_string()];
    let err = m.precache(&network, &origin(), &manifest).await.unwrap_err();

    assert!(matches!(err, ShellCacheError::Provisioning { ref url, .. } if url.ends_with("/offline.html")));
    assert!(storage.store_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn holds_manifest_only_after_complete_precache() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = StubNetwork::new();
    network.serve("https://app.test/", Response::new(200, "shell"));
    network.serve("https://app.test/offline.html", Response::new(200, "offline"));

    let m = manager("v1", &storage);
    let manifest = vec!["/".to_string(), "/offline.html".to_string()];
    assert!(!m.holds_manifest(&origin(), &manifest).unwrap());

    // An empty store with the right name is not enough
    m.precache_store().unwrap();
    assert!(!m.holds_manifest(&origin(), &manifest).unwrap());

    m.precache(&network, &origin(), &manifest).await.unwrap();
    assert!(m.holds_manifest(&origin(), &manifest).unwrap());
  }

  #[tokio::test]
  async fn precache_rejects_error_statuses() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = StubNetwork::new();
    network.serve("https://app.test/", Response::new(503, "busy"));

    let m = manager("v1", &storage);
    let err = m
      .precache(&network, &origin(), &["/".to_string()])
      .await
      .unwrap_err();
    assert!(err.to_string().contains("HTTP 503"));
    assert!(storage.store_names().unwrap().is_empty());
  }
}
