//! Versioned cache install/activate and the worker lifecycle state.

use futures::future::try_join_all;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::WorkerError;
use crate::net::{Network, Request};
use crate::platform::{Clients, Registration};

use super::storage::{CacheEntry, CacheStorage};
use super::types::CacheVersion;

/// Where this worker is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkerState {
  #[default]
  Parsed,
  Installing,
  Installed,
  Activating,
  /// Controlling pages; fetches are intercepted
  Activated,
  /// Install failed or the worker was replaced
  Redundant,
}

/// What a successful install wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub version: String,
  pub cached: usize,
}

/// What activation removed, and what it failed to remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
  pub purged: Vec<String>,
  pub failed: Vec<(String, String)>,
}

/// Owns bucket creation and deletion. Nothing else writes to the store.
pub struct CacheLifecycleManager<S: CacheStorage> {
  config: Arc<Config>,
  storage: Arc<S>,
  network: Arc<dyn Network>,
  clients: Arc<dyn Clients>,
  registration: Arc<dyn Registration>,
  /// Lifecycle of the most recently installed version
  state: Mutex<WorkerState>,
  /// Set once a version has activated; a later install never clears it
  controlling: Mutex<bool>,
}

impl<S: CacheStorage> CacheLifecycleManager<S> {
  pub fn new(
    config: Arc<Config>,
    storage: Arc<S>,
    network: Arc<dyn Network>,
    clients: Arc<dyn Clients>,
    registration: Arc<dyn Registration>,
  ) -> Self {
    Self {
      config,
      storage,
      network,
      clients,
      registration,
      state: Mutex::new(WorkerState::Parsed),
      controlling: Mutex::new(false),
    }
  }

  pub fn state(&self) -> WorkerState {
    *self.lock_state()
  }

  fn lock_state(&self) -> MutexGuard<'_, WorkerState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_state(&self, state: WorkerState) {
    *self.lock_state() = state;
  }

  /// Whether an activated version is serving fetches from its bucket.
  ///
  /// Stays true while a newer install runs, and after one fails.
  pub fn is_controlling(&self) -> bool {
    *self.controlling.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Bucket the router reads from.
  #[cfg(test)]
  pub fn active_bucket(&self) -> &str {
    &self.config.cache.version
  }

  /// Precache every resource of `version` into a fresh bucket.
  ///
  /// Nothing is written unless every fetch succeeds with a 2xx status. A
  /// version that already activated keeps serving fetches meanwhile.
  pub async fn install(&self, version: &CacheVersion) -> Result<InstallReport, WorkerError> {
    info!(version = %version.version, "install");
    self.set_state(WorkerState::Installing);

    match self.precache(version).await {
      Ok(report) => {
        self.set_state(WorkerState::Installed);
        info!(version = %report.version, cached = report.cached, "precache complete");

        // Take over from the previous worker now; pages are claimed on activate
        if let Err(e) = self.skip_waiting().await {
          warn!(error = %e, "skip waiting after install failed");
        }
        Ok(report)
      }
      Err(e) => {
        self.set_state(WorkerState::Redundant);
        error!(version = %version.version, error = %e, "install failed, previous version stays active");
        Err(e)
      }
    }
  }

  async fn precache(&self, version: &CacheVersion) -> Result<InstallReport, WorkerError> {
    let requests = version
      .precache
      .iter()
      .map(|path| self.config.resolve(path).map(Request::get))
      .collect::<Result<Vec<_>, _>>()?;

    let entries = try_join_all(requests.into_iter().map(|request| async move {
      let response = self
        .network
        .fetch(&request)
        .await
        .map_err(|e| WorkerError::Install {
          resource: request.url.to_string(),
          reason: e.to_string(),
        })?;

      if !response.ok() {
        return Err(WorkerError::Install {
          resource: request.url.to_string(),
          reason: format!("HTTP {}", response.status),
        });
      }

      Ok(CacheEntry {
        method: request.method,
        url: request.url,
        response,
      })
    }))
    .await?;

    self.storage.put_bucket(&version.version, &entries)?;

    Ok(InstallReport {
      version: version.version.clone(),
      cached: entries.len(),
    })
  }

  /// Purge every bucket except `version`, then claim open pages.
  ///
  /// Only an installed version may activate, otherwise the purge would
  /// remove the bucket still in control. Purging is best-effort; only a
  /// failed claim fails activation.
  pub async fn activate(&self, version: &str) -> Result<ActivationReport, WorkerError> {
    {
      let mut state = self.lock_state();
      if *state != WorkerState::Installed {
        warn!(version, state = ?*state, "activate refused, version not installed");
        return Err(WorkerError::NotInstalled {
          version: version.to_string(),
          state: *state,
        });
      }
      *state = WorkerState::Activating;
    }
    info!(version, "activate");

    let mut report = ActivationReport::default();
    match self.storage.bucket_names() {
      Ok(names) => {
        for name in names.into_iter().filter(|name| name != version) {
          match self.storage.delete_bucket(&name) {
            Ok(_) => {
              info!(bucket = %name, "cleared old cache");
              report.purged.push(name);
            }
            Err(e) => {
              warn!(bucket = %name, error = %e, "failed to clear old cache");
              report.failed.push((name, e.to_string()));
            }
          }
        }
      }
      Err(e) => warn!(error = %e, "could not list caches, skipping purge"),
    }

    if let Err(e) = self.clients.claim().await {
      // Installed again so the activation can be retried
      self.set_state(WorkerState::Installed);
      error!(version, error = %e, "claiming clients failed");
      return Err(e.into());
    }
    *self.controlling.lock().unwrap_or_else(|e| e.into_inner()) = true;
    self.set_state(WorkerState::Activated);
    info!(version, purged = report.purged.len(), "now controlling clients");

    Ok(report)
  }

  /// Ask the platform to cut over to this worker immediately.
  pub async fn skip_waiting(&self) -> Result<(), WorkerError> {
    self.registration.skip_waiting().await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CachedResponse, SqliteStorage};
  use crate::error::StorageError;
  use crate::host::LocalHost;
  use crate::net::{request_key, Method, Response};
  use crate::test_support::StubNetwork;

  fn manager(
    network: Arc<StubNetwork>,
    storage: Arc<SqliteStorage>,
    host: Arc<LocalHost>,
  ) -> CacheLifecycleManager<SqliteStorage> {
    CacheLifecycleManager::new(
      Arc::new(Config::default()),
      storage,
      network,
      host.clone(),
      host,
    )
  }

  fn key(path: &str) -> String {
    request_key(Method::Get, &Config::default().resolve(path).unwrap())
  }

  #[tokio::test]
  async fn test_install_caches_every_manifest_resource() {
    let config = Config::default();
    let network = Arc::new(StubNetwork::serving_manifest(&config));
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    let host = Arc::new(LocalHost::new());
    let lifecycle = manager(network.clone(), storage.clone(), host.clone());

    let report = lifecycle.install(&config.cache).await.unwrap();
    assert_eq!(report.cached, config.cache.precache.len());
    assert_eq!(lifecycle.state(), WorkerState::Installed);
    assert_eq!(host.skip_waiting_calls(), 1);

    for path in &config.cache.precache {
      let cached = storage
        .match_entry("employee-checkin-v1", &key(path))
        .unwrap()
        .expect("resource cached");
      let original = network.canned(&config.resolve(path).unwrap()).unwrap();
      assert_eq!(cached.response.body, original.body);
    }
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let config = Config::default();
    let network = Arc::new(StubNetwork::serving_manifest(&config));
    network.fail(config.resolve("/icon-512.png").unwrap());
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    let host = Arc::new(LocalHost::new());
    let lifecycle = manager(network, storage.clone(), host.clone());

    let err = lifecycle.install(&config.cache).await.unwrap_err();
    assert!(matches!(err, WorkerError::Install { ref resource, .. } if resource.ends_with("/icon-512.png")));
    assert!(storage.bucket_names().unwrap().is_empty());
    assert_eq!(lifecycle.state(), WorkerState::Redundant);
    assert_eq!(host.skip_waiting_calls(), 0);
  }

  #[tokio::test]
  async fn test_install_rejects_error_status() {
    let config = Config::default();
    let network = Arc::new(StubNetwork::serving_manifest(&config));
    network.respond(
      config.resolve("/manifest.json").unwrap(),
      Response::new(404, "not found"),
    );
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    let lifecycle = manager(network, storage.clone(), Arc::new(LocalHost::new()));

    let err = lifecycle.install(&config.cache).await.unwrap_err();
    assert!(err.to_string().contains("HTTP 404"));
    assert!(storage.bucket_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_failed_install_keeps_previous_bucket() {
    let config = Config::default();
    let network = Arc::new(StubNetwork::serving_manifest(&config));
    network.fail(config.resolve("/").unwrap());
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    storage.put_bucket("employee-checkin-v0", &[]).unwrap();
    let lifecycle = manager(network, storage.clone(), Arc::new(LocalHost::new()));

    assert!(lifecycle.install(&config.cache).await.is_err());
    assert_eq!(
      storage.bucket_names().unwrap(),
      vec!["employee-checkin-v0".to_string()]
    );
  }

  #[tokio::test]
  async fn test_activate_leaves_only_current_bucket() {
    let config = Config::default();
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    storage.put_bucket("employee-checkin-v0", &[]).unwrap();
    storage.put_bucket("other-app-cache", &[]).unwrap();
    storage.put_bucket("employee-checkin-v1", &[]).unwrap();
    let host = Arc::new(LocalHost::new());
    let network = Arc::new(StubNetwork::serving_manifest(&config));
    let lifecycle = manager(network, storage.clone(), host.clone());

    lifecycle.install(&config.cache).await.unwrap();
    let report = lifecycle.activate(&config.cache.version).await.unwrap();
    assert_eq!(report.purged.len(), 2);
    assert!(report.failed.is_empty());
    assert_eq!(
      storage.bucket_names().unwrap(),
      vec!["employee-checkin-v1".to_string()]
    );
    assert!(host.claimed());
    assert_eq!(lifecycle.state(), WorkerState::Activated);
    assert!(lifecycle.is_controlling());
  }

  #[tokio::test]
  async fn test_activate_after_failed_install_keeps_previous_bucket() {
    let config = Config::default();
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    storage.put_bucket("employee-checkin-v0", &[]).unwrap();
    let host = Arc::new(LocalHost::new());
    let lifecycle = manager(Arc::new(StubNetwork::new()), storage.clone(), host.clone());

    assert!(lifecycle.install(&config.cache).await.is_err());
    let err = lifecycle.activate(&config.cache.version).await.unwrap_err();

    assert!(matches!(
      err,
      WorkerError::NotInstalled {
        state: WorkerState::Redundant,
        ..
      }
    ));
    assert_eq!(
      storage.bucket_names().unwrap(),
      vec!["employee-checkin-v0".to_string()]
    );
    assert!(!host.claimed());
    assert!(!lifecycle.is_controlling());
    assert_eq!(lifecycle.state(), WorkerState::Redundant);
  }

  #[tokio::test]
  async fn test_activate_requires_install() {
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    storage.put_bucket("employee-checkin-v0", &[]).unwrap();
    let lifecycle = manager(
      Arc::new(StubNetwork::new()),
      storage.clone(),
      Arc::new(LocalHost::new()),
    );

    let err = lifecycle.activate("employee-checkin-v1").await.unwrap_err();
    assert!(matches!(
      err,
      WorkerError::NotInstalled {
        state: WorkerState::Parsed,
        ..
      }
    ));
    assert_eq!(storage.bucket_names().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_failed_reinstall_keeps_active_version_controlling() {
    let config = Config::default();
    let network = Arc::new(StubNetwork::serving_manifest(&config));
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    let lifecycle = manager(network.clone(), storage.clone(), Arc::new(LocalHost::new()));

    lifecycle.install(&config.cache).await.unwrap();
    lifecycle.activate(&config.cache.version).await.unwrap();

    network.go_offline();
    assert!(lifecycle.install(&config.cache).await.is_err());

    assert_eq!(lifecycle.state(), WorkerState::Redundant);
    assert!(lifecycle.is_controlling());
    assert_eq!(
      storage.entry_count(&config.cache.version).unwrap(),
      config.cache.precache.len()
    );
  }

  /// Storage whose deletes fail for one bucket name.
  struct StickyBucket {
    inner: SqliteStorage,
    sticky: &'static str,
  }

  impl CacheStorage for StickyBucket {
    fn bucket_names(&self) -> Result<Vec<String>, StorageError> {
      self.inner.bucket_names()
    }

    fn put_bucket(&self, bucket: &str, entries: &[CacheEntry]) -> Result<(), StorageError> {
      self.inner.put_bucket(bucket, entries)
    }

    fn match_entry(
      &self,
      bucket: &str,
      key: &str,
    ) -> Result<Option<CachedResponse>, StorageError> {
      self.inner.match_entry(bucket, key)
    }

    fn delete_bucket(&self, bucket: &str) -> Result<bool, StorageError> {
      if bucket == self.sticky {
        return Err(StorageError::Poisoned("disk busy".to_string()));
      }
      self.inner.delete_bucket(bucket)
    }
  }

  #[tokio::test]
  async fn test_purge_failure_does_not_block_claim() {
    let config = Arc::new(Config::default());
    let inner = SqliteStorage::in_memory().unwrap();
    inner.put_bucket("stuck", &[]).unwrap();
    inner.put_bucket("stale", &[]).unwrap();
    let storage = Arc::new(StickyBucket {
      inner,
      sticky: "stuck",
    });
    let host = Arc::new(LocalHost::new());
    let lifecycle = CacheLifecycleManager::new(
      config.clone(),
      storage,
      Arc::new(StubNetwork::serving_manifest(&config)),
      host.clone(),
      host.clone(),
    );

    lifecycle.install(&config.cache).await.unwrap();
    let report = lifecycle.activate("employee-checkin-v1").await.unwrap();
    assert_eq!(report.purged, vec!["stale".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "stuck");
    assert!(host.claimed());
  }
}
