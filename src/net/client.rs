use async_trait::async_trait;
use tracing::debug;

use crate::error::TransportError;

use super::types::{Method, Request, Response};

/// Live network access. Implementations return `Ok` for every response the
/// server produced, whatever its status.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, TransportError>;
}

/// Network backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| TransportError::Other(e.to_string()))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, TransportError> {
    let method = match request.method {
      Method::Get => reqwest::Method::GET,
      Method::Head => reqwest::Method::HEAD,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
      Method::Options => reqwest::Method::OPTIONS,
    };

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await.map_err(classify_error)?;
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await.map_err(classify_error)?.to_vec();

    let response = Response {
      status,
      headers,
      body,
    };
    debug!(
      url = %request.url,
      status,
      bytes = response.body.len(),
      content_type = response.header("Content-Type").unwrap_or(""),
      "network response"
    );

    Ok(response)
  }
}

/// Map a reqwest failure onto the transport error kinds the router cares about.
fn classify_error(e: reqwest::Error) -> TransportError {
  if e.is_timeout() {
    return TransportError::Timeout;
  }

  let message = e.to_string();
  if e.is_connect() {
    let lower = message.to_lowercase();
    if lower.contains("dns") || lower.contains("resolve") {
      TransportError::Dns(message)
    } else {
      TransportError::Offline(message)
    }
  } else if e.is_body() || e.is_request() {
    TransportError::Reset(message)
  } else {
    TransportError::Other(message)
  }
}
