//! Scripted network for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

use crate::config::Config;
use crate::error::TransportError;
use crate::net::{Network, Request, Response};

/// Network that answers from a per-URL table. Unknown URLs fail as offline.
#[derive(Default)]
pub struct StubNetwork {
  routes: Mutex<HashMap<String, Result<Response, TransportError>>>,
  calls: Mutex<Vec<String>>,
}

impl StubNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  /// Serves a distinct body for every precache path of `config`.
  pub fn serving_manifest(config: &Config) -> Self {
    let network = Self::new();
    for path in &config.cache.precache {
      network.respond(
        config.resolve(path).unwrap(),
        Response::new(200, format!("resource {}", path)).with_header("Content-Type", "text/plain"),
      );
    }
    network
  }

  pub fn respond(&self, url: Url, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Ok(response));
  }

  pub fn fail(&self, url: Url) {
    self.routes.lock().unwrap().insert(
      url.to_string(),
      Err(TransportError::Offline("stubbed failure".to_string())),
    );
  }

  /// Fail every URL, including ones with a scripted response.
  pub fn go_offline(&self) {
    let mut routes = self.routes.lock().unwrap();
    for route in routes.values_mut() {
      *route = Err(TransportError::Offline("stubbed failure".to_string()));
    }
  }

  pub fn canned(&self, url: &Url) -> Option<Response> {
    self
      .routes
      .lock()
      .unwrap()
      .get(url.as_str())
      .and_then(|r| r.as_ref().ok().cloned())
  }

  pub fn calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Network for StubNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, TransportError> {
    self.calls.lock().unwrap().push(request.url.to_string());
    self
      .routes
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned()
      .unwrap_or_else(|| Err(TransportError::Offline(format!("no route to {}", request.url))))
  }
}
