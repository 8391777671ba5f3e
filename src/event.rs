use async_trait::async_trait;
use serde_json::Value;

use crate::cache::Served;
use crate::error::Result;
use crate::net::Request;

/// Events the host delivers to an agent instance
#[derive(Debug, Clone)]
pub enum AgentEvent {
  Install,
  Activate,
  /// Intercepted request
  Fetch(Request),
  /// Control message posted by the application
  Message(Value),
  /// Background sync with its tag
  Sync(String),
  /// Push with its optional text payload
  Push(Option<String>),
  NotificationClick,
}

/// Result of an intercepted fetch
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  Respond(Served),
  /// Not intercepted; the host performs the request natively
  Passthrough,
}

/// One handler per event kind.
#[async_trait]
pub trait AgentHandler: Send + Sync {
  async fn on_install(&self) -> Result<()>;

  async fn on_activate(&self) -> Result<()>;

  async fn on_fetch(&self, request: &Request) -> Result<FetchOutcome>;

  async fn on_message(&self, message: &Value) -> Result<()>;

  async fn on_sync(&self, tag: &str) -> Result<()>;

  async fn on_push(&self, payload: Option<&str>) -> Result<()>;

  async fn on_notification_click(&self) -> Result<()>;
}

/// Route an event to its handler. Only fetches produce an outcome.
pub async fn dispatch<H: AgentHandler + ?Sized>(
  handler: &H,
  event: AgentEvent,
) -> Result<Option<FetchOutcome>> {
  match event {
    AgentEvent::Install => handler.on_install().await.map(|_| None),
    AgentEvent::Activate => handler.on_activate().await.map(|_| None),
    AgentEvent::Fetch(request) => handler.on_fetch(&request).await.map(Some),
    AgentEvent::Message(message) => handler.on_message(&message).await.map(|_| None),
    AgentEvent::Sync(tag) => handler.on_sync(&tag).await.map(|_| None),
    AgentEvent::Push(payload) => handler.on_push(payload.as_deref()).await.map(|_| None),
    AgentEvent::NotificationClick => handler.on_notification_click().await.map(|_| None),
  }
}
