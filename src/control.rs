//! Out-of-band commands sent by the application.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheStorage, StoreManager};
use crate::error::Result;
use crate::host::Host;

/// Wire format: `{"type": "SKIP_WAITING"}` or `{"type": "CLEAR_CACHE"}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  SkipWaiting,
  ClearCache,
}

impl ControlMessage {
  /// Decode a message. Anything unrecognised yields `None`.
  pub fn parse(value: &Value) -> Option<Self> {
    serde_json::from_value(value.clone()).ok()
  }

  pub fn to_value(self) -> Value {
    serde_json::json!(self)
  }
}

pub struct ControlChannel<S: CacheStorage> {
  stores: StoreManager<S>,
  host: Arc<dyn Host>,
}

impl<S: CacheStorage> ControlChannel<S> {
  pub fn new(stores: StoreManager<S>, host: Arc<dyn Host>) -> Self {
    Self { stores, host }
  }

  /// Apply a raw message; unknown messages are ignored.
  pub fn receive(&self, message: &Value) -> Result<()> {
    match ControlMessage::parse(message) {
      Some(command) => self.apply(command),
      None => {
        debug!(%message, "Ignoring unknown control message");
        Ok(())
      }
    }
  }

  pub fn apply(&self, command: ControlMessage) -> Result<()> {
    match command {
      ControlMessage::SkipWaiting => {
        info!("Skip waiting requested");
        self.host.skip_waiting();
      }
      ControlMessage::ClearCache => {
        // Not re-provisioned; the next install repopulates the precache
        let removed = self.stores.clear_all()?;
        info!(removed = removed.len(), "Cleared all stores");
      }
    }
    Ok(())
  }
}
