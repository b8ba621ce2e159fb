use std::future::Future;
use tracing::{debug, error};

use crate::cache::{ActivationReport, InstallReport, Routed};
use crate::error::WorkerError;
use crate::net::Request;
use crate::notify::{ClickOutcome, MessageOutcome};
use crate::sync::SyncReport;

/// Events the platform delivers to the worker
#[derive(Debug, Clone)]
pub enum WorkerEvent {
  /// A new version was registered; precache it
  Install,
  /// The new version is taking over; purge old caches and claim pages
  Activate,
  /// A page issued a request
  Fetch(Request),
  /// Connectivity came back for a registered sync tag
  Sync { tag: String },
  /// Push message, optionally carrying text
  Push { payload: Option<String> },
  /// The user clicked a notification (or one of its actions)
  NotificationClick { action: Option<String> },
  /// `postMessage` from a page; shape is up to the page
  Message(serde_json::Value),
}

impl WorkerEvent {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Install => "install",
      Self::Activate => "activate",
      Self::Fetch(_) => "fetch",
      Self::Sync { .. } => "sync",
      Self::Push { .. } => "push",
      Self::NotificationClick { .. } => "notificationclick",
      Self::Message(_) => "message",
    }
  }
}

/// What handling an event produced
#[derive(Debug, Clone)]
pub enum EventOutcome {
  Installed(InstallReport),
  Activated(ActivationReport),
  /// The worker answered the request
  Responded(Routed),
  /// Not controlling pages yet; the platform performs the request itself
  Passthrough,
  Synced(SyncReport),
  NotificationShown,
  NotificationClicked(ClickOutcome),
  Message(MessageOutcome),
}

/// Keeps an event's invocation alive until the work registered on it settles.
///
/// Each piece of work runs as its own task, so a panic inside one handler is
/// reported as `HandlerAborted` for that event and nothing else.
pub struct Lifetime {
  event: &'static str,
  extensions: usize,
}

impl Lifetime {
  pub fn new(event: &'static str) -> Self {
    Self {
      event,
      extensions: 0,
    }
  }

  /// Run `task` and do not let the event finish before it settles.
  pub async fn wait_until<T, F>(&mut self, task: F) -> Result<T, WorkerError>
  where
    T: Send + 'static,
    F: Future<Output = Result<T, WorkerError>> + Send + 'static,
  {
    self.extensions += 1;
    debug!(event = self.event, extensions = self.extensions, "extending event lifetime");
    match tokio::spawn(task).await {
      Ok(result) => result,
      Err(e) => {
        let reason = if e.is_panic() { "panicked" } else { "cancelled" };
        error!(event = self.event, reason, "event handler aborted");
        Err(WorkerError::HandlerAborted {
          event: self.event,
          reason: reason.to_string(),
        })
      }
    }
  }

  /// `wait_until` for the response of a fetch event.
  pub async fn respond_with<F>(&mut self, task: F) -> Result<Routed, WorkerError>
  where
    F: Future<Output = Result<Routed, WorkerError>> + Send + 'static,
  {
    self.wait_until(task).await
  }

  /// How many tasks this event was kept alive for.
  #[cfg(test)]
  pub fn extensions(&self) -> usize {
    self.extensions
  }
}
