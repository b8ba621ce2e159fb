//! Per-request strategy selection: network-first for data calls, cache-first
//! for everything else.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheStorage, Routed};
use crate::config::Config;
use crate::error::{TransportError, WorkerError};
use crate::net::{Network, Request, Response};

/// URL substrings that mark a request as a data call.
pub const DATA_MARKERS: &[&str] = &["api", "webhook"];

/// Body of the offline answer to a data call; field order is part of the contract.
pub const OFFLINE_BODY: &str =
  r#"{"status":"offline","message":"You are offline. Data will be synced when connection is restored."}"#;

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Network-first, offline JSON on transport failure
  DataApi,
  /// Cache-first, live fetch on miss
  Static,
}

/// The response data calls get when the network is unreachable.
pub fn offline_response() -> Response {
  Response::new(200, OFFLINE_BODY).with_header("Content-Type", "application/json")
}

/// Routes intercepted requests. Reads the active bucket, never writes it.
pub struct RequestRouter<S: CacheStorage> {
  config: Arc<Config>,
  storage: Arc<S>,
  network: Arc<dyn Network>,
}

impl<S: CacheStorage> RequestRouter<S> {
  pub fn new(config: Arc<Config>, storage: Arc<S>, network: Arc<dyn Network>) -> Self {
    Self {
      config,
      storage,
      network,
    }
  }

  pub fn classify(&self, request: &Request) -> RequestClass {
    let url = request.url.as_str();
    if DATA_MARKERS.iter().any(|marker| url.contains(marker)) {
      RequestClass::DataApi
    } else {
      RequestClass::Static
    }
  }

  pub async fn handle(&self, request: &Request) -> Result<Routed, WorkerError> {
    match self.classify(request) {
      RequestClass::DataApi => Ok(self.network_first(request).await),
      RequestClass::Static => self.cache_first(request).await,
    }
  }

  /// Live fetch; any transport failure becomes the offline JSON response.
  async fn network_first(&self, request: &Request) -> Routed {
    match self.network.fetch(request).await {
      Ok(response) => {
        debug!(url = %request.url, status = response.status, "data request served from network");
        Routed::from_network(response)
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "data request failed, answering offline");
        Routed::offline(offline_response())
      }
    }
  }

  async fn cache_first(&self, request: &Request) -> Result<Routed, WorkerError> {
    if let Some(response) = self.lookup(request) {
      debug!(url = %request.url, "served from cache");
      return Ok(Routed::from_cache(response));
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        debug!(url = %request.url, status = response.status, "cache miss, served from network");
        Ok(Routed::from_network(response))
      }
      Err(e) if request.is_navigation() => self.navigation_fallback(request, e),
      Err(e) => {
        warn!(url = %request.url, error = %e, "not cached and network failed");
        Err(WorkerError::StaticRequest {
          url: request.url.to_string(),
          source: e,
        })
      }
    }
  }

  /// Cached root document for navigations that could not be served.
  fn navigation_fallback(&self, request: &Request, cause: TransportError) -> Result<Routed, WorkerError> {
    let fallback = Request::get(self.config.resolve(&self.config.fallback_document)?);
    warn!(url = %request.url, error = %cause, fallback = %fallback.url, "navigation offline, serving fallback document");

    self
      .lookup(&fallback)
      .map(Routed::navigation_fallback)
      .ok_or_else(|| WorkerError::NavigationFallbackMissing {
        url: fallback.url.to_string(),
      })
  }

  /// Exact match in the active bucket. Storage errors count as a miss.
  fn lookup(&self, request: &Request) -> Option<Response> {
    match self
      .storage
      .match_entry(&self.config.cache.version, &request.cache_key())
    {
      Ok(cached) => cached.map(|c| {
        debug!(url = %request.url, cached_at = %c.cached_at, "cache hit");
        c.response
      }),
      Err(e) => {
        warn!(url = %request.url, error = %e, "cache lookup failed");
        None
      }
    }
  }
}
