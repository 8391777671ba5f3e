//! Active/waiting bookkeeping for one scope, driving agents through their
//! lifecycle the way the platform would.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::cache::{CacheStorage, Served};
use crate::error::Result;
use crate::event::{dispatch, AgentEvent, FetchOutcome};
use crate::host::{ClientId, LocalHost, RegistrationEvent};
use crate::net::{Network, Request};

/// Which agent a control message is posted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
  Active,
  Waiting,
}

pub struct Registration<S: CacheStorage, N: Network> {
  host: LocalHost,
  network: Arc<N>,
  active: Option<Agent<S, N>>,
  waiting: Option<Agent<S, N>>,
}

impl<S: CacheStorage, N: Network> Registration<S, N> {
  pub fn new(host: LocalHost, network: Arc<N>) -> Self {
    Self {
      host,
      network,
      active: None,
      waiting: None,
    }
  }

  pub fn host(&self) -> &LocalHost {
    &self.host
  }

  pub fn active(&self) -> Option<&Agent<S, N>> {
    self.active.as_ref()
  }

  pub fn waiting(&self) -> Option<&Agent<S, N>> {
    self.waiting.as_ref()
  }

  /// Adopt an agent activated in an earlier run without reinstalling it.
  pub fn resume(&mut self, agent: Agent<S, N>) {
    agent.resume();
    info!(version = %agent.version(), "Resumed active agent");
    self.active = Some(agent);
  }

  /// Resume `agent` if its precache is complete, otherwise install it.
  ///
  /// A store left behind by an interrupted install does not count.
  pub async fn resume_or_update(&mut self, agent: Agent<S, N>) -> Result<()> {
    if agent.is_provisioned()? {
      self.resume(agent);
      Ok(())
    } else {
      self.update(agent).await
    }
  }

  /// A new agent version was found: install it, then activate or park it.
  ///
  /// If install fails the agent is discarded and the current one stays in
  /// control.
  pub async fn update(&mut self, agent: Agent<S, N>) -> Result<()> {
    let version = agent.version().to_string();
    self.host.publish(RegistrationEvent::UpdateFound {
      version: version.clone(),
    });

    if let Err(e) = dispatch(&agent, AgentEvent::Install).await {
      warn!(%version, error = %e, "Discarding agent after failed install");
      self.host.publish(RegistrationEvent::InstallFailed {
        version,
        error: e.to_string(),
      });
      return Err(e);
    }

    // A newer install supersedes whatever was already waiting
    if let Some(previous) = self.waiting.take() {
      previous.retire();
    }

    if self.host.take_skip_waiting(&version) || self.active.is_none() {
      self.promote(agent).await
    } else {
      info!(%version, "Installed, waiting for clients to release");
      self.host.publish(RegistrationEvent::UpdateReady { version });
      self.waiting = Some(agent);
      Ok(())
    }
  }

  /// Post a control message, then promote the waiting agent if it asked to skip waiting.
  pub async fn post_message(&mut self, target: MessageTarget, message: &Value) -> Result<()> {
    let agent = match target {
      MessageTarget::Active => self.active.as_ref(),
      MessageTarget::Waiting => self.waiting.as_ref(),
    };

    match agent {
      Some(agent) => {
        dispatch(agent, AgentEvent::Message(message.clone())).await?;
      }
      None => {
        debug!(?target, "No agent to receive message");
        return Ok(());
      }
    }

    self.promote_waiting_if_released().await
  }

  /// A window closed; once none remain the waiting agent may activate.
  #[allow(dead_code)]
  pub async fn close_client(&mut self, id: ClientId) -> Result<()> {
    self.host.close_client(id);
    if self.host.clients().is_empty() {
      if let Some(agent) = self.waiting.take() {
        return self.promote(agent).await;
      }
    }
    Ok(())
  }

  /// Route a request through the active agent, or natively if it is not intercepted.
  pub async fn fetch(&self, request: &Request) -> Result<Served> {
    if let Some(agent) = &self.active {
      let outcome = dispatch(agent, AgentEvent::Fetch(request.clone())).await?;
      if let Some(FetchOutcome::Respond(served)) = outcome {
        return Ok(served);
      }
    }

    Ok(Served::from_network(self.network.fetch(request).await?))
  }

  /// Deliver a functional event (sync, push, click) to the active agent.
  /// Dropped when no agent is active.
  pub async fn deliver(&self, event: AgentEvent) -> Result<()> {
    match &self.active {
      Some(agent) => dispatch(agent, event).await.map(|_| ()),
      None => {
        debug!(?event, "No active agent, dropping event");
        Ok(())
      }
    }
  }

  async fn promote_waiting_if_released(&mut self) -> Result<()> {
    let released = self
      .waiting
      .as_ref()
      .is_some_and(|agent| self.host.take_skip_waiting(agent.version()));

    match self.waiting.take() {
      Some(agent) if released => self.promote(agent).await,
      other => {
        self.waiting = other;
        Ok(())
      }
    }
  }

  /// Activate `agent` and retire the previous one. If activation fails the
  /// previous agent stays in control and `agent` is parked as waiting.
  async fn promote(&mut self, agent: Agent<S, N>) -> Result<()> {
    if let Err(e) = dispatch(&agent, AgentEvent::Activate).await {
      warn!(version = %agent.version(), error = %e, "Activation failed");
      self.waiting = Some(agent);
      return Err(e);
    }

    if let Some(previous) = self.active.take() {
      previous.retire();
    }

    let version = agent.version().to_string();
    self.active = Some(agent);
    self.host.publish(RegistrationEvent::Activated { version });
    Ok(())
  }
}
