//! JSON-lines event scripts replayed against the worker.
//!
//! One event per line, `#` starts a comment:
//!
//! ```text
//! {"event": "open_client"}
//! {"event": "install"}
//! {"event": "activate"}
//! {"event": "fetch", "url": "/index.html", "navigate": true}
//! {"event": "message", "data": {"type": "REQUEST_SYNC"}}
//! {"event": "connectivity_restored"}
//! ```

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use crate::cache::CacheStorage;
use crate::config::Config;
use crate::error::WorkerError;
use crate::event::{EventOutcome, WorkerEvent};
use crate::host::LocalHost;
use crate::net::{Method, Network, Request};
use crate::platform::ClientId;
use crate::sync::SYNC_TAG;
use crate::worker::ServiceWorker;

fn default_sync_tag() -> String {
  SYNC_TAG.to_string()
}

/// A single scripted host event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptStep {
  Install,
  Activate,
  Fetch {
    url: String,
    #[serde(default)]
    method: Method,
    /// Issue as a top-level navigation
    #[serde(default)]
    navigate: bool,
    #[serde(default)]
    body: Option<String>,
  },
  Sync {
    #[serde(default = "default_sync_tag")]
    tag: String,
  },
  Push {
    #[serde(default)]
    payload: Option<String>,
  },
  NotificationClick {
    #[serde(default)]
    action: Option<String>,
  },
  Message {
    data: serde_json::Value,
  },
  OpenClient,
  CloseClient {
    id: String,
  },
  /// Fire every sync registration the host is holding
  ConnectivityRestored,
}

/// Parse a script, skipping blank lines and `#` comments.
pub fn parse_script(input: &str) -> Result<Vec<ScriptStep>> {
  input
    .lines()
    .enumerate()
    .map(|(i, line)| (i + 1, line.trim()))
    .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
    .map(|(number, line)| {
      serde_json::from_str(line).map_err(|e| eyre!("Invalid script line {}: {}", number, e))
    })
    .collect()
}

/// Drives a worker and its in-process host from script steps.
pub struct Replay<S: CacheStorage> {
  config: Arc<Config>,
  worker: ServiceWorker<S>,
  host: Arc<LocalHost>,
  network: Arc<dyn Network>,
}

impl<S: CacheStorage + 'static> Replay<S> {
  pub fn new(
    config: Arc<Config>,
    worker: ServiceWorker<S>,
    host: Arc<LocalHost>,
    network: Arc<dyn Network>,
  ) -> Self {
    Self {
      config,
      worker,
      host,
      network,
    }
  }

  /// Run one step and describe what happened in a single line.
  pub async fn run_step(&self, step: ScriptStep) -> Result<String, WorkerError> {
    match step {
      ScriptStep::Install => self.dispatch(WorkerEvent::Install).await,
      ScriptStep::Activate => self.dispatch(WorkerEvent::Activate).await,
      ScriptStep::Fetch {
        url,
        method,
        navigate,
        body,
      } => {
        let url = self.config.resolve(&url)?;
        let mut request = if navigate {
          Request::navigate(url)
        } else {
          Request::get(url)
        }
        .with_method(method);
        if let Some(body) = body {
          request = request.with_body(body);
        }

        match self.worker.dispatch(WorkerEvent::Fetch(request.clone())).await? {
          EventOutcome::Passthrough => Ok(match self.network.fetch(&request).await {
            Ok(response) => format!(
              "fetch {}: not intercepted, HTTP {} ({} bytes)",
              request.url,
              response.status,
              response.body.len()
            ),
            Err(e) => format!("fetch {}: not intercepted, {}", request.url, e),
          }),
          outcome => Ok(describe(&outcome)),
        }
      }
      ScriptStep::Sync { tag } => self.dispatch(WorkerEvent::Sync { tag }).await,
      ScriptStep::Push { payload } => self.dispatch(WorkerEvent::Push { payload }).await,
      ScriptStep::NotificationClick { action } => {
        self
          .dispatch(WorkerEvent::NotificationClick { action })
          .await
      }
      ScriptStep::Message { data } => self.dispatch(WorkerEvent::Message(data)).await,
      ScriptStep::OpenClient => Ok(format!("opened {}", self.host.open_client())),
      ScriptStep::CloseClient { id } => {
        let id = ClientId(id);
        Ok(if self.host.close_client(&id) {
          format!("closed {}", id)
        } else {
          format!("{} was not open", id)
        })
      }
      ScriptStep::ConnectivityRestored => {
        let tags = self.host.take_pending_syncs();
        if tags.is_empty() {
          return Ok("online, no sync pending".to_string());
        }
        let mut lines = Vec::with_capacity(tags.len());
        let mut retry = Vec::new();
        for tag in tags {
          match self.dispatch(WorkerEvent::Sync { tag: tag.clone() }).await {
            Ok(line) => lines.push(line),
            Err(e) => {
              warn!(tag = %tag, error = %e, "sync failed, keeping it pending");
              lines.push(format!("{} failed: {}", tag, e));
              retry.push(tag);
            }
          }
        }
        if !retry.is_empty() {
          self.host.restore_pending_syncs(retry);
        }
        Ok(format!("online: {}", lines.join("; ")))
      }
    }
  }

  async fn dispatch(&self, event: WorkerEvent) -> Result<String, WorkerError> {
    let outcome = self.worker.dispatch(event).await?;
    Ok(describe(&outcome))
  }
}

fn describe(outcome: &EventOutcome) -> String {
  match outcome {
    EventOutcome::Installed(report) => {
      format!("installed {} ({} resources)", report.version, report.cached)
    }
    EventOutcome::Activated(report) => format!(
      "activated, purged [{}], failed [{}]",
      report.purged.join(", "),
      report
        .failed
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
    ),
    EventOutcome::Responded(routed) => format!(
      "{:?}: HTTP {} ({} bytes)",
      routed.source,
      routed.response.status,
      routed.response.body.len()
    ),
    EventOutcome::Passthrough => "not intercepted".to_string(),
    EventOutcome::Synced(report) => format!(
      "woke {} client(s), {} unreachable",
      report.delivered, report.failed
    ),
    EventOutcome::NotificationShown => "notification shown".to_string(),
    EventOutcome::NotificationClicked(outcome) => format!("notification click: {:?}", outcome),
    EventOutcome::Message(outcome) => format!("message: {:?}", outcome),
  }
}
