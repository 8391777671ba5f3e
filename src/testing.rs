//! Test doubles shared across module tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::cache::{CacheStorage, CachedEntry, SqliteStorage};
use crate::config::Config;
use crate::error::{Result, ShellCacheError};
use crate::net::{Network, Request, RequestKey, Response};

enum Route {
  Serve(Response),
  Fail,
}

/// Scripted network: per-URL responses or failures, plus a request log.
/// Unknown URLs answer 404.
#[derive(Default)]
pub struct StubNetwork {
  routes: Mutex<HashMap<String, Route>>,
  offline: Mutex<bool>,
  log: Mutex<Vec<Request>>,
}

impl StubNetwork {
  pub const OFFLINE_PAGE: &'static str = "<!doctype html><title>Offline</title>";

  pub fn new() -> Self {
    Self::default()
  }

  /// Serves every entry of the manifest returned by `test_config`.
  pub fn with_shell() -> Self {
    let network = Self::new();
    network.serve("https://app.test/", Response::new(200, "<!doctype html>shell"));
    network.serve("https://app.test/static/favicon.png", Response::new(200, "png"));
    network.serve("https://app.test/offline.html", Response::new(200, Self::OFFLINE_PAGE));
    network
  }

  pub fn serve(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Route::Serve(response));
  }

  pub fn fail(&self, url: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Route::Fail);
  }

  pub fn go_offline(&self) {
    *self.offline.lock().unwrap() = true;
  }

  pub fn go_online(&self) {
    *self.offline.lock().unwrap() = false;
  }

  pub fn requests(&self) -> Vec<Request> {
    self.log.lock().unwrap().clone()
  }
}

#[async_trait]
impl Network for StubNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.log.lock().unwrap().push(request.clone());

    if *self.offline.lock().unwrap() {
      return Err(ShellCacheError::Network("network unreachable".into()));
    }

    match self.routes.lock().unwrap().get(request.url.as_str()) {
      Some(Route::Serve(response)) => Ok(response.clone()),
      Some(Route::Fail) => Err(ShellCacheError::Network(format!(
        "connection refused: {}",
        request.url
      ))),
      None => Ok(Response::new(404, "not found")),
    }
  }
}

/// In-memory SQLite storage whose store deletions can be made to fail.
pub struct FlakyStorage {
  inner: SqliteStorage,
  fail_deletes: AtomicBool,
}

impl FlakyStorage {
  pub fn new() -> Self {
    Self {
      inner: SqliteStorage::open_in_memory().unwrap(),
      fail_deletes: AtomicBool::new(false),
    }
  }

  pub fn fail_deletes(&self, fail: bool) {
    self.fail_deletes.store(fail, Ordering::SeqCst);
  }
}

impl CacheStorage for FlakyStorage {
  fn create_store(&self, name: &str) -> Result<()> {
    self.inner.create_store(name)
  }

  fn store_names(&self) -> Result<Vec<String>> {
    self.inner.store_names()
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    if self.fail_deletes.load(Ordering::SeqCst) {
      return Err(ShellCacheError::StoreUnavailable("database is locked".into()));
    }
    self.inner.delete_store(name)
  }

  fn get_entry(&self, store: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    self.inner.get_entry(store, key)
  }

  fn put_entry(&self, store: &str, key: &RequestKey, response: &Response) -> Result<bool> {
    self.inner.put_entry(store, key, response)
  }

  fn put_entries(&self, store: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    self.inner.put_entries(store, entries)
  }

  fn entry_keys(&self, store: &str) -> Result<Vec<RequestKey>> {
    self.inner.entry_keys(store)
  }
}

/// Config for origin `https://app.test` with a three-entry shell.
pub fn test_config(version: &str) -> Config {
  Config::from_yaml(&format!(
    r#"
origin: https://app.test
cache:
  prefix: app
  version: {version}
precache: ["/", "/static/favicon.png", "/offline.html"]
"#
  ))
  .unwrap()
}
