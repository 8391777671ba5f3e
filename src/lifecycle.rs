//! Install and activate handling for one agent version.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheStorage, StoreManager};
use crate::error::{Result, ShellCacheError};
use crate::host::Host;
use crate::net::Network;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Installing,
  /// Installed, waiting for the previous version to release its clients
  Installed,
  Activating,
  Active,
  /// Failed to install, or superseded by a newer version
  Redundant,
}

pub struct LifecycleController<S: CacheStorage, N: Network> {
  stores: StoreManager<S>,
  network: Arc<N>,
  host: Arc<dyn Host>,
  origin: Url,
  manifest: Vec<String>,
  skip_waiting_on_install: bool,
  state: Mutex<LifecycleState>,
}

impl<S: CacheStorage, N: Network> LifecycleController<S, N> {
  pub fn new(
    stores: StoreManager<S>,
    network: Arc<N>,
    host: Arc<dyn Host>,
    origin: Url,
    manifest: Vec<String>,
  ) -> Self {
    Self {
      stores,
      network,
      host,
      origin,
      manifest,
      skip_waiting_on_install: true,
      state: Mutex::new(LifecycleState::Installing),
    }
  }

  /// Stay in the waiting state after install until told otherwise.
  pub fn wait_after_install(mut self) -> Self {
    self.skip_waiting_on_install = false;
    self
  }

  pub fn state(&self) -> LifecycleState {
    *self.lock_state()
  }

  /// Provision the precache store. A failure leaves this version redundant.
  pub async fn install(&self) -> Result<()> {
    let version = self.stores.names().version().to_string();
    self.set_state(LifecycleState::Installing);
    info!(%version, "Installing");

    match self
      .stores
      .precache(self.network.as_ref(), &self.origin, &self.manifest)
      .await
    {
      Ok(count) => {
        info!(%version, count, "Precache complete");
        if self.skip_waiting_on_install {
          self.host.skip_waiting();
        }
        self.set_state(LifecycleState::Installed);
        Ok(())
      }
      Err(e) => {
        warn!(%version, error = %e, "Install failed");
        self.set_state(LifecycleState::Redundant);
        Err(e)
      }
    }
  }

  /// Evict every store of other versions, then take control of open clients.
  pub async fn activate(&self) -> Result<()> {
    match self.state() {
      LifecycleState::Active => return Ok(()),
      LifecycleState::Installed => {}
      other => {
        return Err(ShellCacheError::Lifecycle(format!(
          "cannot activate from {:?}",
          other
        )))
      }
    }

    self.set_state(LifecycleState::Activating);
    info!(version = %self.stores.names().version(), "Activating");

    let current = self.stores.names().current();
    let removed = match self.stores.evict_stale(&current) {
      Ok(removed) => removed,
      Err(e) => {
        warn!(error = %e, "Activation failed, staying installed");
        self.set_state(LifecycleState::Installed);
        return Err(e);
      }
    };
    info!(removed = removed.len(), "Stale stores evicted");

    self.stores.claim_control(self.host.as_ref());
    self.set_state(LifecycleState::Active);
    Ok(())
  }

  /// Whether the precache store holds the complete manifest.
  pub fn is_provisioned(&self) -> Result<bool> {
    self.stores.holds_manifest(&self.origin, &self.manifest)
  }

  /// Resume an already-activated version, e.g. after a process restart.
  pub fn resume(&self) {
    self.set_state(LifecycleState::Active);
  }

  pub fn retire(&self) {
    self.set_state(LifecycleState::Redundant);
  }

  fn set_state(&self, state: LifecycleState) {
    *self.lock_state() = state;
  }

  fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}
