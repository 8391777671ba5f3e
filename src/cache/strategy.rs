//! Retrieval strategies run against the stores and the network.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use crate::error::{Result, ShellCacheError};
use crate::net::{Network, Request};

use super::manager::{Store, StoreManager};
use super::storage::CacheStorage;
use super::traits::{RefreshEvent, Served};

/// Executes cache-first, network-first and network-only retrieval.
///
/// Holds no state of its own beyond handles; every read and write goes
/// through the `StoreManager`.
pub struct StrategyExecutor<S: CacheStorage, N: Network> {
  stores: StoreManager<S>,
  network: Arc<N>,
  /// Served to navigations when both network and runtime store miss
  offline_page: Url,
  refresh_tx: Option<mpsc::UnboundedSender<RefreshEvent>>,
}

impl<S: CacheStorage, N: Network> StrategyExecutor<S, N> {
  pub fn new(stores: StoreManager<S>, network: Arc<N>, offline_page: Url) -> Self {
    Self {
      stores,
      network,
      offline_page,
      refresh_tx: None,
    }
  }

  /// Report the outcome of every background refresh on this channel.
  pub fn with_refresh_listener(mut self, tx: mpsc::UnboundedSender<RefreshEvent>) -> Self {
    self.refresh_tx = Some(tx);
    self
  }

  /// Serve from the precache store, revalidating in the background.
  ///
  /// 1. Hit - return the stored copy, refresh it without blocking
  /// 2. Miss - fetch, store 2xx GET responses, return
  /// 3. Network failure on a miss propagates
  pub async fn cache_first(&self, request: &Request) -> Result<Served> {
    let store = self.stores.precache_store()?;

    if let Some(entry) = store.lookup(request)? {
      self.spawn_refresh(store, request.clone());
      return Ok(Served::from_cache(entry.response, entry.cached_at));
    }

    let response = self.network.fetch(request).await?;
    if response.is_ok() && request.method.is_storable() && !store.put(request, &response)? {
      debug!(store = %store.name(), url = %request.url, "Store deleted mid-request, not caching");
    }

    Ok(Served::from_network(response))
  }

  /// Prefer the network, writing through to the runtime store.
  ///
  /// On network failure: runtime copy, then the offline document for
  /// navigations, then `NoFallback`.
  pub async fn network_first(&self, request: &Request) -> Result<Served> {
    let runtime = self.stores.runtime_store()?;

    let cause = match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_ok() && request.method.is_storable() && !runtime.put(request, &response)? {
          debug!(store = %runtime.name(), url = %request.url, "Store deleted mid-request, not caching");
        }
        return Ok(Served::from_network(response));
      }
      Err(e) => e,
    };

    debug!(url = %request.url, error = %cause, "Network failed, trying runtime store");

    if let Some(entry) = runtime.lookup(request)? {
      return Ok(Served::offline(entry.response, entry.cached_at));
    }

    if request.is_navigation() {
      let offline = Request::from_url(self.offline_page.clone());
      if let Some(entry) = self.stores.precache_match(&offline)? {
        return Ok(Served::offline_page(entry.response, entry.cached_at));
      }
    }

    Err(ShellCacheError::NoFallback {
      url: request.url.to_string(),
      cause: cause.to_string(),
    })
  }

  /// Forward to the network untouched. Stores are never consulted.
  pub async fn network_only(&self, request: &Request) -> Result<Served> {
    let response = self.network.fetch(request).await?;
    Ok(Served::from_network(response))
  }

  fn spawn_refresh(&self, store: Store<S>, request: Request) {
    let network = Arc::clone(&self.network);
    let refresh_tx = self.refresh_tx.clone();

    tokio::spawn(async move {
      let url = request.url.to_string();

      let event = match network.fetch(&request).await {
        Ok(response) if response.is_ok() && request.method.is_storable() => {
          match store.put(&request, &response) {
            Ok(true) => RefreshEvent::Updated { url },
            Ok(false) => RefreshEvent::Discarded { url },
            Err(e) => RefreshEvent::Failed {
              url,
              error: e.to_string(),
            },
          }
        }
        Ok(response) => RefreshEvent::Skipped {
          url,
          status: response.status,
        },
        Err(e) => RefreshEvent::Failed {
          url,
          error: e.to_string(),
        },
      };

      debug!(?event, "Background refresh finished");
      if let Some(tx) = refresh_tx {
        let _ = tx.send(event);
      }
    });
  }
}

impl<S: CacheStorage, N: Network> Clone for StrategyExecutor<S, N> {
  fn clone(&self) -> Self {
    Self {
      stores: self.stores.clone(),
      network: Arc::clone(&self.network),
      offline_page: self.offline_page.clone(),
      refresh_tx: self.refresh_tx.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ResponseSource, SqliteStorage, StoreNames};
  use crate::net::{Method, Response};
  use crate::testing::StubNetwork;

  struct Fixture {
    storage: Arc<SqliteStorage>,
    network: Arc<StubNetwork>,
    executor: StrategyExecutor<SqliteStorage, StubNetwork>,
    refreshes: mpsc::UnboundedReceiver<RefreshEvent>,
  }

  fn fixture() -> Fixture {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(StubNetwork::new());
    let stores = StoreManager::new(Arc::clone(&storage), StoreNames::new("app", "v1"));
    let (tx, refreshes) = mpsc::unbounded_channel();
    let executor = StrategyExecutor::new(
      stores,
      Arc::clone(&network),
      Url::parse("https://app.test/offline.html").unwrap(),
    )
    .with_refresh_listener(tx);

    Fixture {
      storage,
      network,
      executor,
      refreshes,
    }
  }

  fn seed(f: &Fixture, store: &str, url: &str, body: &str) {
    let request = Request::get(url).unwrap();
    f.storage.create_store(store).unwrap();
    f.storage
      .put_entry(store, &request.key(), &Response::new(200, body))
      .unwrap();
  }

  fn stored_body(f: &Fixture, store: &str, url: &str) -> Option<Vec<u8>> {
    let request = Request::get(url).unwrap();
    f.storage
      .get_entry(store, &request.key())
      .unwrap()
      .map(|e| e.response.body)
  }

  #[tokio::test]
  async fn cache_first_hit_returns_stored_value_then_refreshes() {
    let mut f = fixture();
    let url = "https://app.test/static/app.css";
    seed(&f, "app-cache-v1", url, "old");
    f.network.serve(url, Response::new(200, "new"));

    let served = f
      .executor
      .cache_first(&Request::get(url).unwrap())
      .await
      .unwrap();
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, b"old");

    let event = f.refreshes.recv().await.unwrap();
    assert_eq!(event, RefreshEvent::Updated { url: url.into() });
    assert_eq!(stored_body(&f, "app-cache-v1", url).unwrap(), b"new");
  }

  #[tokio::test]
  async fn refresh_landing_after_clear_does_not_recreate_store() {
    let mut f = fixture();
    let url = "https://app.test/static/favicon.png";
    seed(&f, "app-cache-v1", url, "png");
    f.network.serve(url, Response::new(200, "fresh png"));

    f.executor
      .cache_first(&Request::get(url).unwrap())
      .await
      .unwrap();
    // Cleared before the spawned refresh gets to run
    f.executor.stores.clear_all().unwrap();

    assert_eq!(
      f.refreshes.recv().await.unwrap(),
      RefreshEvent::Discarded { url: url.into() }
    );
    assert!(f.storage.store_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn cache_first_refresh_failure_keeps_cached_copy() {
    let mut f = fixture();
    let url = "https://app.test/static/logo.svg";
    seed(&f, "app-cache-v1", url, "logo");
    f.network.fail(url);

    let served = f
      .executor
      .cache_first(&Request::get(url).unwrap())
      .await
      .unwrap();
    assert_eq!(served.response.body, b"logo");

    assert!(matches!(
      f.refreshes.recv().await.unwrap(),
      RefreshEvent::Failed { .. }
    ));
    assert_eq!(stored_body(&f, "app-cache-v1", url).unwrap(), b"logo");
  }

  #[tokio::test]
  async fn cache_first_refresh_ignores_error_status() {
    let mut f = fixture();
    let url = "https://app.test/static/font.woff2";
    seed(&f, "app-cache-v1", url, "font");
    f.network.serve(url, Response::new(500, "oops"));

    f.executor
      .cache_first(&Request::get(url).unwrap())
      .await
      .unwrap();

    assert_eq!(
      f.refreshes.recv().await.unwrap(),
      RefreshEvent::Skipped {
        url: url.into(),
        status: 500
      }
    );
    assert_eq!(stored_body(&f, "app-cache-v1", url).unwrap(), b"font");
  }

  #[tokio::test]
  async fn cache_first_miss_fetches_and_stores() {
    let f = fixture();
    let url = "https://app.test/assets/chunk.js";
    f.network.serve(url, Response::new(200, "chunk"));

    let served = f
      .executor
      .cache_first(&Request::get(url).unwrap())
      .await
      .unwrap();
    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(stored_body(&f, "app-cache-v1", url).unwrap(), b"chunk");
  }

  #[tokio::test]
  async fn cache_first_miss_does_not_store_errors_or_non_get() {
    let f = fixture();
    let missing = "https://app.test/assets/missing.js";
    f.network.serve(missing, Response::new(404, "nope"));
    let posted = "https://app.test/assets/upload.png";
    f.network.serve(posted, Response::new(200, "ok"));

    let served = f
      .executor
      .cache_first(&Request::get(missing).unwrap())
      .await
      .unwrap();
    assert_eq!(served.response.status, 404);

    let post = Request::get(posted).unwrap().with_method(Method::Post);
    f.executor.cache_first(&post).await.unwrap();

    assert!(f.storage.entry_keys("app-cache-v1").unwrap().is_empty());
  }

  #[tokio::test]
  async fn cache_first_miss_propagates_network_failure() {
    let f = fixture();
    f.network.go_offline();

    let err = f
      .executor
      .cache_first(&Request::get("https://app.test/static/x.png").unwrap())
      .await
      .unwrap_err();
    assert!(err.is_network());
  }

  #[tokio::test]
  async fn network_first_writes_through_to_runtime_store() {
    let f = fixture();
    let url = "https://app.test/manifest.json";
    f.network.serve(url, Response::new(200, "{}"));

    let served = f
      .executor
      .network_first(&Request::get(url).unwrap())
      .await
      .unwrap();
    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(stored_body(&f, "app-runtime-v1", url).unwrap(), b"{}");
  }

  #[tokio::test]
  async fn network_first_falls_back_to_runtime_copy() {
    let f = fixture();
    let url = "https://app.test/c/42";
    seed(&f, "app-runtime-v1", url, "cached page");
    f.network.go_offline();

    let served = f
      .executor
      .network_first(&Request::get(url).unwrap().navigate())
      .await
      .unwrap();
    assert_eq!(served.source, ResponseSource::Offline);
    assert_eq!(served.response.body, b"cached page");
  }

  #[tokio::test]
  async fn navigation_falls_back_to_offline_document() {
    let f = fixture();
    let offline = b"<html>offline</html>\n\x00\xff";
    f.storage.create_store("app-cache-v1").unwrap();
    f.storage
      .put_entry(
        "app-cache-v1",
        &Request::get("https://app.test/offline.html").unwrap().key(),
        &Response::new(200, offline.to_vec()),
      )
      .unwrap();
    f.network.go_offline();

    let served = f
      .executor
      .network_first(&Request::get("https://app.test/settings").unwrap().navigate())
      .await
      .unwrap();
    assert_eq!(served.source, ResponseSource::OfflinePage);
    assert_eq!(served.response.body, offline.to_vec());
  }

  #[tokio::test]
  async fn non_navigation_without_copy_has_no_fallback() {
    let f = fixture();
    seed(&f, "app-cache-v1", "https://app.test/offline.html", "offline");
    f.network.go_offline();

    let err = f
      .executor
      .network_first(&Request::get("https://app.test/data.json").unwrap())
      .await
      .unwrap_err();
    assert!(matches!(err, ShellCacheError::NoFallback { .. }));
  }

  #[tokio::test]
  async fn network_first_returns_error_status_without_storing() {
    let f = fixture();
    let url = "https://app.test/gone";
    f.network.serve(url, Response::new(410, "gone"));

    let served = f
      .executor
      .network_first(&Request::get(url).unwrap())
      .await
      .unwrap();
    assert_eq!(served.response.status, 410);
    assert!(stored_body(&f, "app-runtime-v1", url).is_none());
  }

  #[tokio::test]
  async fn network_only_does_not_store_error_statuses() {
    let f = fixture();
    let url = "https://app.test/api/x";
    f.network.serve(url, Response::new(500, "boom"));

    let served = f
      .executor
      .network_only(&Request::get(url).unwrap())
      .await
      .unwrap();

    assert_eq!(served.response.status, 500);
    assert!(f.storage.store_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn network_only_never_touches_stores() {
    let f = fixture();
    let url = "https://app.test/api/users";
    f.network.serve(url, Response::new(200, "[]"));

    f.executor
      .network_only(&Request::get(url).unwrap())
      .await
      .unwrap();
    f.network.go_offline();
    let err = f
      .executor
      .network_only(&Request::get(url).unwrap())
      .await
      .unwrap_err();

    assert!(err.is_network());
    assert!(f.storage.store_names().unwrap().is_empty());
  }
}
