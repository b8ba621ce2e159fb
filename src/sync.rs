//! Background sync: register a wake-up for when connectivity returns, then
//! tell every open page to replay its offline writes.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::platform::{Clients, OutboundMessage, Registration};

/// Tag the platform wakes us with after connectivity is restored.
pub const SYNC_TAG: &str = "background-sync-checkins";

/// Registration state of a sync task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
  /// Requested, waiting on the platform scheduler
  Pending,
  /// Accepted by the platform
  Registered,
  /// Wake event received, fan-out in progress
  Fired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTask {
  pub tag: String,
  pub state: SyncState,
}

/// Outcome of a wake fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub delivered: usize,
  pub failed: usize,
}

pub struct SyncCoordinator {
  clients: Arc<dyn Clients>,
  registration: Arc<dyn Registration>,
  tasks: Mutex<HashMap<String, SyncTask>>,
}

impl SyncCoordinator {
  pub fn new(clients: Arc<dyn Clients>, registration: Arc<dyn Registration>) -> Self {
    Self {
      clients,
      registration,
      tasks: Mutex::new(HashMap::new()),
    }
  }

  fn set_task(&self, tag: &str, state: Option<SyncState>) {
    let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
    match state {
      Some(state) => {
        tasks.insert(
          tag.to_string(),
          SyncTask {
            tag: tag.to_string(),
            state,
          },
        );
      }
      None => {
        tasks.remove(tag);
      }
    }
  }

  pub fn task(&self, tag: &str) -> Option<SyncTask> {
    self
      .tasks
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .get(tag)
      .cloned()
  }

  /// Ask the platform to wake us with `tag` once online. Not retried here:
  /// the page has to send REQUEST_SYNC again.
  pub async fn register_intent(&self, tag: &str) -> Result<(), WorkerError> {
    self.set_task(tag, Some(SyncState::Pending));

    match self.registration.register_sync(tag).await {
      Ok(()) => {
        self.set_task(tag, Some(SyncState::Registered));
        info!(tag, "background sync registered");
        Ok(())
      }
      Err(e) => {
        self.set_task(tag, None);
        error!(tag, error = %e, "background sync registration failed");
        Err(WorkerError::SyncRegistration(e))
      }
    }
  }

  /// Wake-up from the platform: post SYNC_OFFLINE_DATA to every open page.
  ///
  /// An unreachable page is counted and skipped; the rest still get the message.
  pub async fn trigger(&self, tag: &str) -> Result<SyncReport, WorkerError> {
    if tag != SYNC_TAG {
      debug!(tag, "ignoring sync for unknown tag");
      return Ok(SyncReport::default());
    }
    match self.task(tag) {
      Some(task) => info!(tag = %task.tag, previous = ?task.state, "background sync"),
      None => info!(tag, "background sync without a recorded registration"),
    }
    self.set_task(tag, Some(SyncState::Fired));

    let result = self.wake_clients().await;
    self.set_task(tag, None);

    match &result {
      Ok(report) => info!(
        delivered = report.delivered,
        failed = report.failed,
        "offline data sync initiated"
      ),
      Err(e) => error!(error = %e, "sync failed"),
    }
    result
  }

  async fn wake_clients(&self) -> Result<SyncReport, WorkerError> {
    let clients = self.clients.match_all().await?;
    let message = OutboundMessage::SyncOfflineData;

    let results = join_all(clients.iter().map(|client| async move {
      let result = self.clients.post_message(client, &message).await;
      if let Err(e) = &result {
        warn!(client = %client, error = %e, "could not reach client");
      }
      result
    }))
    .await;

    let delivered = results.iter().filter(|r| r.is_ok()).count();
    Ok(SyncReport {
      delivered,
      failed: results.len() - delivered,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::host::LocalHost;

  fn coordinator(host: &Arc<LocalHost>) -> SyncCoordinator {
    SyncCoordinator::new(host.clone(), host.clone())
  }

  #[tokio::test]
  async fn test_register_intent_records_registration() {
    let host = Arc::new(LocalHost::new());
    let sync = coordinator(&host);

    sync.register_intent(SYNC_TAG).await.unwrap();
    assert_eq!(host.pending_syncs(), vec![SYNC_TAG.to_string()]);
    assert_eq!(sync.task(SYNC_TAG).unwrap().state, SyncState::Registered);
  }

  #[tokio::test]
  async fn test_rejected_registration_is_not_retried() {
    let host = Arc::new(LocalHost::new());
    host.reject_sync(true);
    let sync = coordinator(&host);

    let err = sync.register_intent(SYNC_TAG).await.unwrap_err();
    assert!(matches!(err, WorkerError::SyncRegistration(_)));
    assert!(sync.task(SYNC_TAG).is_none());
    assert_eq!(host.sync_attempts(), 1);
  }

  #[tokio::test]
  async fn test_trigger_wakes_only_open_clients() {
    let host = Arc::new(LocalHost::new());
    let a = host.open_client();
    let b = host.open_client();
    let closed = host.open_client();
    host.close_client(&closed);
    let sync = coordinator(&host);

    sync.register_intent(SYNC_TAG).await.unwrap();
    let report = sync.trigger(SYNC_TAG).await.unwrap();

    assert_eq!(report, SyncReport { delivered: 2, failed: 0 });
    assert_eq!(host.inbox(&a), vec![OutboundMessage::SyncOfflineData]);
    assert_eq!(host.inbox(&b), vec![OutboundMessage::SyncOfflineData]);
    assert!(host.inbox(&closed).is_empty());
    assert!(sync.task(SYNC_TAG).is_none());
  }

  #[tokio::test]
  async fn test_unreachable_client_does_not_block_others() {
    let host = Arc::new(LocalHost::new());
    let a = host.open_client();
    let stuck = host.open_client();
    let c = host.open_client();
    host.set_unreachable(&stuck, true);
    let sync = coordinator(&host);

    let report = sync.trigger(SYNC_TAG).await.unwrap();
    assert_eq!(report, SyncReport { delivered: 2, failed: 1 });
    assert_eq!(host.inbox(&a).len(), 1);
    assert_eq!(host.inbox(&c).len(), 1);
  }

  #[tokio::test]
  async fn test_unknown_tag_is_ignored() {
    let host = Arc::new(LocalHost::new());
    let a = host.open_client();
    let sync = coordinator(&host);

    let report = sync.trigger("periodic-refresh").await.unwrap();
    assert_eq!(report, SyncReport::default());
    assert!(host.inbox(&a).is_empty());
  }
}
