//! The worker: one exhaustive dispatcher from platform events to components.

use std::sync::Arc;
use tracing::debug;

use crate::cache::{CacheLifecycleManager, CacheStorage, WorkerState};
use crate::config::Config;
use crate::error::WorkerError;
use crate::event::{EventOutcome, Lifetime, WorkerEvent};
use crate::net::Network;
use crate::notify::ClientNotifier;
use crate::platform::{Clients, Registration};
use crate::router::RequestRouter;
use crate::sync::SyncCoordinator;

pub struct ServiceWorker<S: CacheStorage> {
  config: Arc<Config>,
  lifecycle: Arc<CacheLifecycleManager<S>>,
  router: Arc<RequestRouter<S>>,
  sync: Arc<SyncCoordinator>,
  notifier: Arc<ClientNotifier<S>>,
}

impl<S: CacheStorage + 'static> ServiceWorker<S> {
  pub fn new(
    config: Arc<Config>,
    storage: Arc<S>,
    network: Arc<dyn Network>,
    clients: Arc<dyn Clients>,
    registration: Arc<dyn Registration>,
  ) -> Self {
    let lifecycle = Arc::new(CacheLifecycleManager::new(
      config.clone(),
      storage.clone(),
      network.clone(),
      clients.clone(),
      registration.clone(),
    ));
    let router = Arc::new(RequestRouter::new(config.clone(), storage, network));
    let sync = Arc::new(SyncCoordinator::new(clients.clone(), registration.clone()));
    let notifier = Arc::new(ClientNotifier::new(
      config.clone(),
      clients,
      registration,
      lifecycle.clone(),
      sync.clone(),
    ));

    Self {
      config,
      lifecycle,
      router,
      sync,
      notifier,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.lifecycle.state()
  }

  #[cfg(test)]
  pub fn active_bucket(&self) -> &str {
    self.lifecycle.active_bucket()
  }

  /// Handle one event. Returns once all work the event started has settled.
  pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome, WorkerError> {
    let mut lifetime = Lifetime::new(event.name());

    match event {
      WorkerEvent::Install => {
        let lifecycle = self.lifecycle.clone();
        let version = self.config.cache.clone();
        lifetime
          .wait_until(async move { lifecycle.install(&version).await })
          .await
          .map(EventOutcome::Installed)
      }
      WorkerEvent::Activate => {
        let lifecycle = self.lifecycle.clone();
        let version = self.config.cache.version.clone();
        lifetime
          .wait_until(async move { lifecycle.activate(&version).await })
          .await
          .map(EventOutcome::Activated)
      }
      WorkerEvent::Fetch(request) => {
        if !self.lifecycle.is_controlling() {
          debug!(url = %request.url, state = ?self.state(), "not controlling, request not intercepted");
          return Ok(EventOutcome::Passthrough);
        }
        let router = self.router.clone();
        lifetime
          .respond_with(async move { router.handle(&request).await })
          .await
          .map(EventOutcome::Responded)
      }
      WorkerEvent::Sync { tag } => {
        let sync = self.sync.clone();
        lifetime
          .wait_until(async move { sync.trigger(&tag).await })
          .await
          .map(EventOutcome::Synced)
      }
      WorkerEvent::Push { payload } => {
        let notifier = self.notifier.clone();
        lifetime
          .wait_until(async move { notifier.on_push(payload.as_deref()).await })
          .await
          .map(|()| EventOutcome::NotificationShown)
      }
      WorkerEvent::NotificationClick { action } => {
        let notifier = self.notifier.clone();
        lifetime
          .wait_until(async move { notifier.on_notification_click(action.as_deref()).await })
          .await
          .map(EventOutcome::NotificationClicked)
      }
      WorkerEvent::Message(data) => {
        let notifier = self.notifier.clone();
        lifetime
          .wait_until(async move { notifier.on_message(&data).await })
          .await
          .map(EventOutcome::Message)
      }
    }
  }
}
