use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// How the host is intercepting the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterceptMode {
  /// Top-level page load
  Navigate,
  /// Subresource (script, style, image, data, ...)
  #[default]
  Resource,
}

/// The identity of an outbound request: URL, method and intercept mode.
///
/// The fragment is never part of the identity, mirroring what a server would see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
  url: Url,
  method: String,
  mode: InterceptMode,
  body: Option<Bytes>,
}

impl RequestIdentity {
  /// A plain `GET` for a subresource.
  pub fn get(url: Url) -> Self {
    Self::new(url, "GET", InterceptMode::Resource)
  }

  /// A `GET` issued as a navigation.
  pub fn navigate(url: Url) -> Self {
    Self::new(url, "GET", InterceptMode::Navigate)
  }

  pub fn new(mut url: Url, method: &str, mode: InterceptMode) -> Self {
    url.set_fragment(None);
    Self {
      url,
      method: method.trim().to_ascii_uppercase(),
      mode,
      body: None,
    }
  }

  /// Attach a request body (only forwarded on passthrough).
  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn mode(&self) -> InterceptMode {
    self.mode
  }

  pub fn body(&self) -> Option<&Bytes> {
    self.body.as_ref()
  }

  pub fn is_get(&self) -> bool {
    self.method == "GET"
  }

  /// Key used to address the response in the store.
  pub fn cache_key(&self) -> &str {
    self.url.as_str()
  }
}

impl fmt::Display for RequestIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// Response tainting, as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
  /// Same-origin response
  Basic,
  /// Cross-origin response fetched with CORS
  Cors,
  /// Cross-origin response that can be replayed but not inspected
  Opaque,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(Self::Basic),
      "cors" => Some(Self::Cors),
      "opaque" => Some(Self::Opaque),
      _ => None,
    }
  }
}

/// An immutable captured response.
///
/// The body is a shared immutable buffer, so a clone handed to the store and
/// the one returned to the caller always carry identical bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub response_type: ResponseType,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl ResponseSnapshot {
  pub fn new(status: u16, response_type: ResponseType, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      response_type,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// 2xx status.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Whether a cache-first miss may store this response.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && matches!(self.response_type, ResponseType::Basic | ResponseType::Cors)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// Credential/tainting mode for a network fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
  /// Forward the request as-is; cross-origin answers come back opaque.
  #[default]
  Passthrough,
  /// Request a readable cross-origin response.
  Cors,
}

/// HTTP cache interaction for a network fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
  #[default]
  Default,
  /// Bypass intermediate caches and force a fresh fetch.
  Reload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchOptions {
  pub mode: FetchMode,
  pub cache: CacheMode,
}

impl FetchOptions {
  pub fn passthrough() -> Self {
    Self::default()
  }

  pub fn cors() -> Self {
    Self {
      mode: FetchMode::Cors,
      cache: CacheMode::Default,
    }
  }

  pub fn reload(mut self) -> Self {
    self.cache = CacheMode::Reload;
    self
  }
}
