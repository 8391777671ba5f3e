//! One agent version: classifier, strategies, lifecycle and control channel
//! wired behind the `AgentHandler` event interface.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

use crate::cache::{CacheStorage, RefreshEvent, StoreManager, StoreNames, StrategyExecutor};
use crate::classify::{Classification, Classifier, PatternRuleSet};
use crate::config::Config;
use crate::control::ControlChannel;
use crate::error::Result;
use crate::event::{AgentHandler, FetchOutcome};
use crate::host::Host;
use crate::lifecycle::{LifecycleController, LifecycleState};
use crate::net::{Network, Request};
use crate::push::{self, ClickOutcome, Notification, PushConfig};

/// Background sync tag reserved for deferred chat messages
pub const SYNC_MESSAGES_TAG: &str = "sync-messages";

pub struct Agent<S: CacheStorage, N: Network> {
  version: String,
  scope_url: Url,
  root_url: Url,
  classifier: Classifier,
  executor: StrategyExecutor<S, N>,
  lifecycle: LifecycleController<S, N>,
  control: ControlChannel<S>,
  push: PushConfig,
  host: Arc<dyn Host>,
}

impl<S: CacheStorage, N: Network> Agent<S, N> {
  pub fn new(config: &Config, storage: Arc<S>, network: Arc<N>, host: Arc<dyn Host>) -> Result<Self> {
    let stores = StoreManager::new(
      storage,
      StoreNames::new(&config.cache.prefix, &config.cache.version),
    );
    let rules = PatternRuleSet::new(&config.patterns.network_only, &config.patterns.cacheable)?;

    let mut lifecycle = LifecycleController::new(
      stores.clone(),
      Arc::clone(&network),
      Arc::clone(&host),
      config.origin.clone(),
      config.precache.clone(),
    );
    if !config.skip_waiting_on_install {
      lifecycle = lifecycle.wait_after_install();
    }

    Ok(Self {
      version: config.cache.version.clone(),
      scope_url: config.resolve(&config.scope)?,
      root_url: config.resolve("/")?,
      classifier: Classifier::new(
        config.origin.clone(),
        config.static_marker.clone(),
        rules,
      ),
      executor: StrategyExecutor::new(stores.clone(), network, config.resolve(&config.offline_page)?),
      lifecycle,
      control: ControlChannel::new(stores, Arc::clone(&host)),
      push: config.push.clone(),
      host,
    })
  }

  /// Observe cache-first background refresh outcomes.
  pub fn with_refresh_listener(mut self, tx: mpsc::UnboundedSender<RefreshEvent>) -> Self {
    self.executor = self.executor.with_refresh_listener(tx);
    self
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn state(&self) -> LifecycleState {
    self.lifecycle.state()
  }

  pub fn is_provisioned(&self) -> Result<bool> {
    self.lifecycle.is_provisioned()
  }

  /// Treat this version as already active (it was activated in an earlier run).
  pub fn resume(&self) {
    self.lifecycle.resume();
  }

  /// Superseded by a newer version.
  pub fn retire(&self) {
    info!(version = %self.version, "Agent is now redundant");
    self.lifecycle.retire();
  }

  async fn sync_messages(&self) {
    // Deferred writes are not queued yet; nothing to replay
    info!("Synchronizing messages");
  }
}

#[async_trait]
impl<S: CacheStorage, N: Network> AgentHandler for Agent<S, N> {
  async fn on_install(&self) -> Result<()> {
    self.lifecycle.install().await
  }

  async fn on_activate(&self) -> Result<()> {
    self.lifecycle.activate().await
  }

  async fn on_fetch(&self, request: &Request) -> Result<FetchOutcome> {
    let classification = self.classifier.classify(request);
    debug!(url = %request.url, method = %request.method, ?classification, "Intercepted");

    let served = match classification {
      Classification::Passthrough => return Ok(FetchOutcome::Passthrough),
      Classification::NetworkOnly => self.executor.network_only(request).await?,
      Classification::Cacheable => self.executor.cache_first(request).await?,
      Classification::Default => self.executor.network_first(request).await?,
    };

    Ok(FetchOutcome::Respond(served))
  }

  async fn on_message(&self, message: &Value) -> Result<()> {
    self.control.receive(message)
  }

  async fn on_sync(&self, tag: &str) -> Result<()> {
    info!(tag, "Background sync");
    if tag == SYNC_MESSAGES_TAG {
      self.sync_messages().await;
    }
    Ok(())
  }

  async fn on_push(&self, payload: Option<&str>) -> Result<()> {
    self
      .host
      .show_notification(Notification::from_push(payload, &self.push));
    Ok(())
  }

  async fn on_notification_click(&self) -> Result<()> {
    let outcome = push::notification_click(
      self.host.as_ref(),
      self.scope_url.as_str(),
      self.root_url.as_str(),
    );
    match outcome {
      ClickOutcome::Focused(client) => debug!(client, "Focused existing window"),
      ClickOutcome::Opened(client) => debug!(client, "Opened window"),
    }
    Ok(())
  }
}
