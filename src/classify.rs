//! Request classification.
//!
//! Maps a request identity to the caching strategy it is served with. The
//! decision depends only on the identity and the routing tables, never on
//! store contents or network state.

use std::collections::BTreeSet;
use url::Url;

use crate::config::RoutingConfig;
use crate::net::{InterceptMode, RequestIdentity};

/// Strategy class of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
  /// Not cacheable; forwarded untouched
  Bypass,
  /// App shell documents: network-first with offline fallback
  Document,
  /// Large external libraries, fonts and CDN assets: stale-while-revalidate
  Heavy,
  /// Everything else: cache-first
  Default,
}

impl RequestClass {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Bypass => "bypass",
      Self::Document => "document",
      Self::Heavy => "heavy",
      Self::Default => "default",
    }
  }
}

#[derive(Debug, Clone)]
pub struct RequestClassifier {
  scope: Url,
  document_suffixes: Vec<String>,
  heavy_prefixes: Vec<String>,
  heavy_hosts: BTreeSet<String>,
}

impl RequestClassifier {
  pub fn new(scope: Url, routing: &RoutingConfig) -> Self {
    Self {
      scope,
      document_suffixes: routing
        .document_suffixes
        .iter()
        .map(|s| s.to_ascii_lowercase())
        .collect(),
      heavy_prefixes: routing.heavy_prefixes.clone(),
      heavy_hosts: routing.heavy_hosts.clone(),
    }
  }

  /// The root document of the scope.
  pub fn root(&self) -> &Url {
    &self.scope
  }

  /// Rules are evaluated in order; first match wins.
  pub fn classify(&self, identity: &RequestIdentity) -> RequestClass {
    if !identity.is_get() {
      return RequestClass::Bypass;
    }

    let url = identity.url();
    if identity.mode() == InterceptMode::Navigate || self.is_document(url) || self.is_root(url) {
      return RequestClass::Document;
    }

    if self.is_heavy(url) {
      return RequestClass::Heavy;
    }

    RequestClass::Default
  }

  fn is_document(&self, url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    self
      .document_suffixes
      .iter()
      .any(|suffix| path.ends_with(suffix.as_str()))
  }

  fn is_root(&self, url: &Url) -> bool {
    if url.origin() != self.scope.origin() {
      return false;
    }
    let path = url.path();
    let scope = self.scope.path();
    path == "/" || path == scope || path == scope.trim_end_matches('/')
  }

  fn is_heavy(&self, url: &Url) -> bool {
    let matches_host = url
      .host_str()
      .map(|h| self.heavy_hosts.contains(&h.to_ascii_lowercase()))
      .unwrap_or(false);

    matches_host
      || self
        .heavy_prefixes
        .iter()
        .any(|prefix| url.as_str().starts_with(prefix.as_str()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classifier() -> RequestClassifier {
    let routing = RoutingConfig {
      heavy_prefixes: vec!["https://unpkg.com/".to_string()],
      heavy_hosts: ["cdn.tailwindcss.com", "fonts.googleapis.com"]
        .into_iter()
        .map(String::from)
        .collect(),
      ..RoutingConfig::default()
    };
    RequestClassifier::new(Url::parse("https://app.test/shell/").unwrap(), &routing)
  }

  fn get(url: &str) -> RequestIdentity {
    RequestIdentity::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_non_get_bypasses_even_for_documents() {
    let id = RequestIdentity::new(
      Url::parse("https://app.test/shell/index.html").unwrap(),
      "POST",
      InterceptMode::Navigate,
    );
    assert_eq!(classifier().classify(&id), RequestClass::Bypass);
  }

  #[test]
  fn test_navigation_is_document() {
    let id = RequestIdentity::navigate(Url::parse("https://app.test/shell/settings").unwrap());
    assert_eq!(classifier().classify(&id), RequestClass::Document);
  }

  #[test]
  fn test_document_suffix_and_root() {
    let c = classifier();
    assert_eq!(c.classify(&get("https://app.test/shell/index.html")), RequestClass::Document);
    assert_eq!(c.classify(&get("https://app.test/shell/ABOUT.HTM")), RequestClass::Document);
    assert_eq!(c.classify(&get("https://app.test/shell/")), RequestClass::Document);
    assert_eq!(c.classify(&get("https://app.test/")), RequestClass::Document);
    assert_eq!(c.classify(&get("https://app.test/shell/?utm=1")), RequestClass::Document);
  }

  #[test]
  fn test_scope_root_without_trailing_slash() {
    let c = classifier();
    assert_eq!(c.classify(&get("https://app.test/shell")), RequestClass::Document);
    assert_eq!(c.classify(&get("https://app.test/shell?v=2")), RequestClass::Document);
    assert_eq!(c.classify(&get("https://app.test/shellfish")), RequestClass::Default);
  }

  #[test]
  fn test_heavy_by_prefix_and_host() {
    let c = classifier();
    assert_eq!(
      c.classify(&get("https://unpkg.com/@babel/standalone/babel.min.js")),
      RequestClass::Heavy
    );
    assert_eq!(c.classify(&get("https://cdn.tailwindcss.com")), RequestClass::Heavy);
    assert_eq!(
      c.classify(&get("https://fonts.googleapis.com/css2?family=Plus+Jakarta+Sans")),
      RequestClass::Heavy
    );
  }

  #[test]
  fn test_everything_else_is_default() {
    let c = classifier();
    assert_eq!(c.classify(&get("https://app.test/shell/manifest.json")), RequestClass::Default);
    assert_eq!(c.classify(&get("https://other.test/")), RequestClass::Default);
    assert_eq!(c.classify(&get("https://unpkg.co/lib.js")), RequestClass::Default);
  }
}
