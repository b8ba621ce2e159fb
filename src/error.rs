//! Error types shared by the worker components.

use thiserror::Error;

use crate::cache::WorkerState;

/// Transport-level fetch failure. HTTP error statuses are responses, not
/// transport failures, and never show up here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
  #[error("network unreachable: {0}")]
  Offline(String),
  #[error("request timed out")]
  Timeout,
  #[error("DNS lookup failed: {0}")]
  Dns(String),
  #[error("connection reset: {0}")]
  Reset(String),
  #[error("fetch failed: {0}")]
  Other(String),
}

/// Local cache store failure.
#[derive(Debug, Error)]
pub enum StorageError {
  #[error("cache directory: {0}")]
  Io(#[from] std::io::Error),
  #[error("sqlite: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("failed to (de)serialize cached headers: {0}")]
  Encoding(#[from] serde_json::Error),
  #[error("invalid timestamp '{0}'")]
  Timestamp(String),
  #[error("lock poisoned: {0}")]
  Poisoned(String),
}

/// The platform (clients, registration, scheduler) rejected an operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} rejected: {reason}")]
pub struct PlatformError {
  pub operation: &'static str,
  pub reason: String,
}

impl PlatformError {
  pub fn new(operation: &'static str, reason: impl Into<String>) -> Self {
    Self {
      operation,
      reason: reason.into(),
    }
  }
}

#[derive(Debug, Error)]
pub enum WorkerError {
  /// A precache resource could not be fetched; nothing was written.
  #[error("install aborted, {resource} failed: {reason}")]
  Install { resource: String, reason: String },

  /// Activation requested before an install of this version completed.
  #[error("cannot activate {version} while {state:?}; the previous version stays in control")]
  NotInstalled {
    version: String,
    state: WorkerState,
  },

  #[error(transparent)]
  Storage(#[from] StorageError),

  /// Cache miss followed by a transport failure on a non-navigation request.
  #[error("{url} is not cached and could not be fetched: {source}")]
  StaticRequest {
    url: String,
    #[source]
    source: TransportError,
  },

  /// Navigation fallback wanted the root document but it is not cached.
  #[error("offline and fallback document {url} is not cached")]
  NavigationFallbackMissing { url: String },

  #[error("background sync registration failed: {0}")]
  SyncRegistration(#[source] PlatformError),

  #[error(transparent)]
  Platform(#[from] PlatformError),

  #[error("invalid url '{url}': {source}")]
  Url {
    url: String,
    #[source]
    source: url::ParseError,
  },

  /// The task doing the event's work panicked or was cancelled.
  #[error("{event} handler aborted: {reason}")]
  HandlerAborted { event: &'static str, reason: String },
}
