//! Push notifications, notification clicks and control messages from pages.

use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheLifecycleManager, CacheStorage};
use crate::config::Config;
use crate::error::WorkerError;
use crate::platform::{
  Clients, InboundMessage, NotificationAction, NotificationDescriptor, Registration,
};
use crate::sync::{SyncCoordinator, SYNC_TAG};

/// What a notification click led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  Opened(String),
  Dismissed,
}

/// What a control message led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
  SkippedWaiting,
  SyncRequested,
  Ignored,
}

pub struct ClientNotifier<S: CacheStorage> {
  config: Arc<Config>,
  clients: Arc<dyn Clients>,
  registration: Arc<dyn Registration>,
  lifecycle: Arc<CacheLifecycleManager<S>>,
  sync: Arc<SyncCoordinator>,
}

impl<S: CacheStorage> ClientNotifier<S> {
  pub fn new(
    config: Arc<Config>,
    clients: Arc<dyn Clients>,
    registration: Arc<dyn Registration>,
    lifecycle: Arc<CacheLifecycleManager<S>>,
    sync: Arc<SyncCoordinator>,
  ) -> Self {
    Self {
      config,
      clients,
      registration,
      lifecycle,
      sync,
    }
  }

  /// Fill the check-in template with the push payload.
  pub fn build_notification(&self, payload: Option<&str>) -> NotificationDescriptor {
    let template = &self.config.notification;
    NotificationDescriptor {
      body: payload.unwrap_or(&template.default_body).to_string(),
      icon: template.icon.clone(),
      badge: template.badge.clone(),
      tag: template.tag.clone(),
      require_interaction: false,
      actions: vec![
        NotificationAction {
          action: "checkin".to_string(),
          title: "Check In".to_string(),
          icon: template.checkin_icon.clone(),
        },
        NotificationAction {
          action: "dismiss".to_string(),
          title: "Dismiss".to_string(),
          icon: template.dismiss_icon.clone(),
        },
      ],
    }
  }

  pub async fn on_push(&self, payload: Option<&str>) -> Result<(), WorkerError> {
    info!(has_payload = payload.is_some(), "push received");
    let notification = self.build_notification(payload);
    self
      .registration
      .show_notification(&self.config.notification.title, &notification)
      .await?;
    Ok(())
  }

  /// The platform has already closed the notification when this runs.
  pub async fn on_notification_click(
    &self,
    action: Option<&str>,
  ) -> Result<ClickOutcome, WorkerError> {
    info!(action = action.unwrap_or(""), "notification click");

    let url = match action {
      Some("dismiss") => return Ok(ClickOutcome::Dismissed),
      Some("checkin") => {
        let mut url = self.config.resolve("/")?;
        url.query_pairs_mut().append_pair("action", "in");
        url
      }
      _ => self.config.resolve("/")?,
    };

    self.clients.open_window(url.as_str()).await?;
    Ok(ClickOutcome::Opened(url.to_string()))
  }

  /// Relay a page's control message. Unknown messages are dropped.
  pub async fn on_message(&self, data: &serde_json::Value) -> Result<MessageOutcome, WorkerError> {
    match InboundMessage::parse(data) {
      Some(InboundMessage::SkipWaiting) => {
        info!("skip waiting requested");
        self.lifecycle.skip_waiting().await?;
        Ok(MessageOutcome::SkippedWaiting)
      }
      Some(InboundMessage::RequestSync) => {
        self.sync.register_intent(SYNC_TAG).await?;
        Ok(MessageOutcome::SyncRequested)
      }
      None => {
        debug!(%data, "ignoring unrecognized message");
        Ok(MessageOutcome::Ignored)
      }
    }
  }
}
