use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;
use url::Url;

use crate::cache::CacheVersion;
use crate::error::WorkerError;

/// Immutable worker configuration, built once and shared by every component.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the app is served from; manifest paths resolve against it
  pub origin: Url,
  pub cache: CacheVersion,
  /// Document served to navigations when both cache and network fail
  pub fallback_document: String,
  pub notification: NotificationConfig,
  /// SQLite cache database (defaults to the user data directory)
  pub storage_path: Option<PathBuf>,
  /// Write logs here instead of stderr
  pub log_dir: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: Url::parse("http://localhost:3000/").expect("static origin parses"),
      cache: CacheVersion::default(),
      fallback_document: "/".to_string(),
      notification: NotificationConfig::default(),
      storage_path: None,
      log_dir: None,
    }
  }
}

/// Template for push notifications.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  /// Body used when the push carries no payload
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
  pub checkin_icon: String,
  pub dismiss_icon: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Employee Check-in".to_string(),
      default_body: "Check-in reminder".to_string(),
      icon: "/icon-192.png".to_string(),
      badge: "/badge-72.png".to_string(),
      tag: "checkin-notification".to_string(),
      checkin_icon: "/icon-checkin.png".to_string(),
      dismiss_icon: "/icon-dismiss.png".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-worker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-worker/config.yaml
  ///
  /// Falls back to the built-in defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => {
        info!("no configuration file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-worker.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-worker").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config = Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    info!(path = %path.display(), version = %config.cache.version, "loaded configuration");
    Ok(config)
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  /// Every path the worker will resolve must be valid against the origin.
  fn validate(&self) -> Result<()> {
    if self.cache.version.trim().is_empty() {
      return Err(eyre!("cache.version must not be empty"));
    }
    for path in self.cache.precache.iter().chain([&self.fallback_document]) {
      self.resolve(path).map_err(|e| eyre!("{}", e))?;
    }
    Ok(())
  }

  /// Resolve an app-relative path against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url, WorkerError> {
    self.origin.join(path).map_err(|source| WorkerError::Url {
      url: path.to_string(),
      source,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_match_deployment() {
    let config = Config::default();
    assert_eq!(config.cache.version, "employee-checkin-v1");
    assert_eq!(config.cache.precache.len(), 8);
    assert_eq!(config.cache.precache[0], "/");
    assert_eq!(config.notification.tag, "checkin-notification");
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
origin: "https://checkin.example.com/app/"
cache:
  version: employee-checkin-v2
notification:
  title: Shift reminder
"#,
    )
    .unwrap();

    assert_eq!(config.origin.as_str(), "https://checkin.example.com/app/");
    assert_eq!(config.cache.version, "employee-checkin-v2");
    assert_eq!(config.cache.precache.len(), 8);
    assert_eq!(config.notification.title, "Shift reminder");
    assert_eq!(config.notification.default_body, "Check-in reminder");
  }

  #[test]
  fn test_empty_version_rejected() {
    let err = Config::from_yaml("cache:\n  version: \"  \"\n").unwrap_err();
    assert!(err.to_string().contains("cache.version"));
  }

  #[test]
  fn test_resolve_against_origin() {
    let config = Config::default();
    let url = config.resolve("/index.html").unwrap();
    assert_eq!(url.as_str(), "http://localhost:3000/index.html");
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/offline-worker.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
