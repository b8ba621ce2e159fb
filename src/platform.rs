//! Seams to the hosting platform: open application instances, the worker
//! registration, and the messages exchanged with pages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PlatformError;

/// Identifier of an open application instance (tab/window).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl fmt::Display for ClientId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Messages pages send to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
  /// Activate the waiting version now instead of after pages close
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
  /// Register a background sync for queued check-ins
  #[serde(rename = "REQUEST_SYNC")]
  RequestSync,
}

impl InboundMessage {
  /// Interpret raw message data. Anything unrecognized yields `None`.
  pub fn parse(data: &serde_json::Value) -> Option<Self> {
    serde_json::from_value(data.clone()).ok()
  }
}

/// Messages the worker posts to pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
  /// Connectivity is back; replay offline writes
  #[serde(rename = "SYNC_OFFLINE_DATA")]
  SyncOfflineData,
}

/// A button shown on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  pub icon: String,
}

/// Everything the platform needs to display a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDescriptor {
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
  pub require_interaction: bool,
  pub actions: Vec<NotificationAction>,
}

/// Application instances controlled by this worker.
#[async_trait]
pub trait Clients: Send + Sync {
  /// Every instance that is currently open.
  async fn match_all(&self) -> Result<Vec<ClientId>, PlatformError>;

  async fn post_message(&self, client: &ClientId, message: &OutboundMessage)
    -> Result<(), PlatformError>;

  /// Take control of every open instance without a reload.
  async fn claim(&self) -> Result<(), PlatformError>;

  /// Open (or focus) an instance at `url`.
  async fn open_window(&self, url: &str) -> Result<(), PlatformError>;
}

/// The worker's own registration with the platform.
#[async_trait]
pub trait Registration: Send + Sync {
  /// Replace the previous worker now rather than when its pages close.
  async fn skip_waiting(&self) -> Result<(), PlatformError>;

  /// Ask to be woken with a sync event for `tag` once online.
  async fn register_sync(&self, tag: &str) -> Result<(), PlatformError>;

  async fn show_notification(
    &self,
    title: &str,
    notification: &NotificationDescriptor,
  ) -> Result<(), PlatformError>;
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_known_messages() {
    assert_eq!(
      InboundMessage::parse(&json!({"type": "SKIP_WAITING"})),
      Some(InboundMessage::SkipWaiting)
    );
    assert_eq!(
      InboundMessage::parse(&json!({"type": "REQUEST_SYNC", "extra": 1})),
      Some(InboundMessage::RequestSync)
    );
  }

  #[test]
  fn test_parse_ignores_unknown_shapes() {
    assert_eq!(InboundMessage::parse(&json!({"type": "PING"})), None);
    assert_eq!(InboundMessage::parse(&json!({"kind": "SKIP_WAITING"})), None);
    assert_eq!(InboundMessage::parse(&json!("SKIP_WAITING")), None);
    assert_eq!(InboundMessage::parse(&serde_json::Value::Null), None);
  }

  #[test]
  fn test_outbound_wire_format() {
    let encoded = serde_json::to_value(OutboundMessage::SyncOfflineData).unwrap();
    assert_eq!(encoded, json!({"type": "SYNC_OFFLINE_DATA"}));
  }
}
