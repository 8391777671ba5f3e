//! Platform services offered to agent instances, and an in-process host.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::push::Notification;

pub type ClientId = u64;

/// An open application window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
  pub id: ClientId,
  pub url: String,
  pub focused: bool,
  /// Version of the agent controlling this window
  pub controller: Option<String>,
}

/// Lifecycle facts surfaced to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationEvent {
  UpdateFound { version: String },
  InstallFailed { version: String, error: String },
  /// Installed while another version still controls clients; prompt the user
  UpdateReady { version: String },
  Activated { version: String },
  /// The window should reload to pick up the new version
  ControllerChanged { client: ClientId, version: String },
}

/// What an agent instance may ask of the platform.
pub trait Host: Send + Sync {
  /// Request activation without waiting for controlled clients to close.
  fn skip_waiting(&self);

  /// Take control of every open client. Returns how many are controlled.
  fn claim_clients(&self) -> usize;

  fn window_clients(&self) -> Vec<WindowClient>;

  fn focus(&self, client: ClientId) -> bool;

  fn open_window(&self, url: &str) -> ClientId;

  fn show_notification(&self, notification: Notification);
}

#[derive(Default)]
struct HostState {
  next_id: ClientId,
  clients: Vec<WindowClient>,
  controller: Option<String>,
  skip_waiting: BTreeSet<String>,
  notifications: Vec<Notification>,
}

/// In-process host shared by every agent version of one registration.
#[derive(Clone)]
pub struct LocalHost {
  scope: String,
  state: Arc<Mutex<HostState>>,
  events: mpsc::UnboundedSender<RegistrationEvent>,
}

impl LocalHost {
  pub fn new(scope: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<RegistrationEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let host = Self {
      scope: scope.into(),
      state: Arc::new(Mutex::new(HostState::default())),
      events: tx,
    };
    (host, rx)
  }

  pub fn scope(&self) -> &str {
    &self.scope
  }

  /// View of the host bound to one agent version.
  pub fn for_version(&self, version: impl Into<String>) -> AgentHost {
    AgentHost {
      version: version.into(),
      host: self.clone(),
    }
  }

  /// A window loads; it is controlled by the current controller, if any.
  pub fn open_client(&self, url: &str) -> ClientId {
    let mut state = self.state();
    state.next_id += 1;
    let id = state.next_id;
    let controller = state.controller.clone();
    state.clients.push(WindowClient {
      id,
      url: url.to_string(),
      focused: false,
      controller,
    });
    id
  }

  pub fn close_client(&self, id: ClientId) {
    self.state().clients.retain(|c| c.id != id);
  }

  pub fn clients(&self) -> Vec<WindowClient> {
    self.state().clients.clone()
  }

  pub fn controller(&self) -> Option<String> {
    self.state().controller.clone()
  }

  pub fn notifications(&self) -> Vec<Notification> {
    self.state().notifications.clone()
  }

  /// Consume a pending skip-waiting request for `version`.
  pub fn take_skip_waiting(&self, version: &str) -> bool {
    self.state().skip_waiting.remove(version)
  }

  pub fn publish(&self, event: RegistrationEvent) {
    debug!(?event, "Registration event");
    // Nobody listening is fine
    let _ = self.events.send(event);
  }

  fn state(&self) -> MutexGuard<'_, HostState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// `Host` implementation handed to a single agent version.
pub struct AgentHost {
  version: String,
  host: LocalHost,
}

impl Host for AgentHost {
  fn skip_waiting(&self) {
    self.host.state().skip_waiting.insert(self.version.clone());
  }

  fn claim_clients(&self) -> usize {
    let changed: Vec<ClientId> = {
      let mut state = self.host.state();
      state.controller = Some(self.version.clone());
      state
        .clients
        .iter_mut()
        .filter(|c| c.controller.as_deref() != Some(self.version.as_str()))
        .map(|c| {
          c.controller = Some(self.version.clone());
          c.id
        })
        .collect()
    };

    for client in &changed {
      self.host.publish(RegistrationEvent::ControllerChanged {
        client: *client,
        version: self.version.clone(),
      });
    }

    self.host.state().clients.len()
  }

  fn window_clients(&self) -> Vec<WindowClient> {
    self.host.clients()
  }

  fn focus(&self, client: ClientId) -> bool {
    let mut state = self.host.state();
    let found = state.clients.iter().any(|c| c.id == client);
    if found {
      for c in state.clients.iter_mut() {
        c.focused = c.id == client;
      }
    }
    found
  }

  fn open_window(&self, url: &str) -> ClientId {
    let id = self.host.open_client(url);
    self.focus(id);
    id
  }

  fn show_notification(&self, notification: Notification) {
    info!(title = %notification.title, "Showing notification");
    self.host.state().notifications.push(notification);
  }
}
