//! Core types for the versioned cache and routed responses.

use serde::Deserialize;

use crate::net::Response;

/// Bucket name of the current deployment.
pub const DEFAULT_VERSION: &str = "employee-checkin-v1";

/// Shell resources needed to render the app offline.
pub const DEFAULT_PRECACHE: &[&str] = &[
  "/",
  "/index.html",
  "/manifest.json",
  "/logo.png",
  "/icon-192.png",
  "/icon-512.png",
  "/icon-96.png",
  "/favicon.png",
];

/// One deployment's cache generation: the bucket name plus the ordered list
/// of resource paths precached into it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheVersion {
  /// Bucket identifier; changes on every deployment
  pub version: String,
  /// Paths relative to the origin, fetched in order during install
  pub precache: Vec<String>,
}

impl CacheVersion {
  pub fn new<I, P>(version: impl Into<String>, precache: I) -> Self
  where
    I: IntoIterator<Item = P>,
    P: Into<String>,
  {
    Self {
      version: version.into(),
      precache: precache.into_iter().map(Into::into).collect(),
    }
  }
}

impl Default for CacheVersion {
  fn default() -> Self {
    Self::new(DEFAULT_VERSION, DEFAULT_PRECACHE.iter().copied())
  }
}

/// A response handed back to the page, with where it came from.
#[derive(Debug, Clone)]
pub struct Routed {
  pub response: Response,
  pub source: ResponseSource,
}

impl Routed {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
    }
  }

  pub fn from_cache(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
    }
  }

  pub fn offline(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::OfflineFallback,
    }
  }

  pub fn navigation_fallback(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::NavigationFallback,
    }
  }
}

/// Indicates where a routed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live network response, passed through unchanged
  Network,
  /// Exact match in the active bucket
  Cache,
  /// Synthesized offline JSON for a failed data request
  OfflineFallback,
  /// Cached root document served for a failed navigation
  NavigationFallback,
}
