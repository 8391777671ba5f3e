//! Push payload rendering and notification clicks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::host::{ClientId, Host};

/// Fixed presentation of push notifications
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
  pub title: String,
  /// Body used when the push carries no text
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  /// Vibration pattern in milliseconds
  pub vibrate: Vec<u32>,
}

impl Default for PushConfig {
  fn default() -> Self {
    Self {
      title: "YuIA".to_string(),
      default_body: "New notification from YuIA".to_string(),
      icon: "/static/web-app-manifest-192x192.png".to_string(),
      badge: "/static/favicon.png".to_string(),
      vibrate: vec![100, 50, 100],
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
  pub date_of_arrival: DateTime<Utc>,
  pub primary_key: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
}

impl Notification {
  /// Render a push payload; an absent or blank payload gets the default body.
  pub fn from_push(payload: Option<&str>, config: &PushConfig) -> Self {
    let body = match payload {
      Some(text) if !text.trim().is_empty() => text.to_string(),
      _ => config.default_body.clone(),
    };

    Self {
      title: config.title.clone(),
      body,
      icon: config.icon.clone(),
      badge: config.badge.clone(),
      vibrate: config.vibrate.clone(),
      data: NotificationData {
        date_of_arrival: Utc::now(),
        primary_key: 1,
      },
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
  Focused(ClientId),
  Opened(ClientId),
}

/// Focus the window sitting at the scope URL, or open one at `root_url`.
pub fn notification_click(host: &dyn Host, scope_url: &str, root_url: &str) -> ClickOutcome {
  let existing = host
    .window_clients()
    .into_iter()
    .find(|c| c.url == scope_url);

  match existing {
    Some(client) if host.focus(client.id) => ClickOutcome::Focused(client.id),
    _ => ClickOutcome::Opened(host.open_window(root_url)),
  }
}
