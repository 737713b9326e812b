use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, PRAGMA};
use reqwest::Method;
use std::time::Duration;
use tracing::debug;
use url::{Origin, Url};

use crate::config::NetworkConfig;
use crate::error::NetworkError;

use super::types::{CacheMode, FetchMode, FetchOptions, RequestIdentity, ResponseSnapshot, ResponseType};

/// The network port the strategies fetch through.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(
    &self,
    identity: &RequestIdentity,
    options: FetchOptions,
  ) -> Result<ResponseSnapshot, NetworkError>;
}

/// `reqwest`-backed network port.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Origin,
}

impl HttpNetwork {
  /// Create a client whose same-origin checks are made against `scope`.
  pub fn new(scope: &Url, config: &NetworkConfig) -> Result<Self, NetworkError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(config.user_agent.clone())
      .build()
      .map_err(|e| NetworkError::InvalidRequest {
        url: scope.to_string(),
        message: format!("failed to build HTTP client: {}", e),
      })?;

    Ok(Self {
      client,
      origin: scope.origin(),
    })
  }
}

/// Tainting as a browser would apply it for a response landing on `url`.
fn response_type(origin: &Origin, url: &Url, mode: FetchMode) -> ResponseType {
  if &url.origin() == origin {
    ResponseType::Basic
  } else {
    match mode {
      FetchMode::Cors => ResponseType::Cors,
      FetchMode::Passthrough => ResponseType::Opaque,
    }
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(
    &self,
    identity: &RequestIdentity,
    options: FetchOptions,
  ) -> Result<ResponseSnapshot, NetworkError> {
    let url = identity.url().clone();
    let method =
      Method::from_bytes(identity.method().as_bytes()).map_err(|e| NetworkError::InvalidRequest {
        url: url.to_string(),
        message: e.to_string(),
      })?;

    let mut headers = HeaderMap::new();
    if options.cache == CacheMode::Reload {
      headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
      headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    }

    let mut request = self.client.request(method, url.clone()).headers(headers);
    if let Some(body) = identity.body() {
      request = request.body(body.clone());
    }

    debug!(%identity, ?options, "network fetch");

    let response = request.send().await.map_err(|e| map_reqwest_error(&url, e))?;

    // Redirects may land on a different origin than the one requested.
    let tainting = response_type(&self.origin, response.url(), options.mode);
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
    let body = response.bytes().await.map_err(|e| map_reqwest_error(&url, e))?;

    Ok(ResponseSnapshot {
      status,
      response_type: tainting,
      headers,
      body,
    })
  }
}

fn map_reqwest_error(url: &Url, e: reqwest::Error) -> NetworkError {
  if e.is_timeout() {
    NetworkError::Timeout {
      url: url.to_string(),
    }
  } else {
    NetworkError::Transport {
      url: url.to_string(),
      message: e.to_string(),
    }
  }
}
