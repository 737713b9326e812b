//! Core traits and types for the versioned store.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::classify::RequestClass;
use crate::error::StoreError;
use crate::net::{RequestIdentity, ResponseSnapshot};

/// Handle to an opened store namespace (a version tag).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace(String);

impl Namespace {
  pub fn new(name: impl Into<String>) -> Result<Self, StoreError> {
    let name = name.into();
    if name.trim().is_empty() {
      return Err(StoreError::InvalidNamespace(name));
    }
    Ok(Self(name))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Namespace {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A namespace as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceInfo {
  pub namespace: Namespace,
  /// When the namespace was first opened
  pub opened_at: DateTime<Utc>,
  /// Number of stored snapshots
  pub entries: u64,
}

/// Trait for versioned store backends.
///
/// Entries are addressed by (namespace, request identity). A namespace only
/// accepts writes between `open` and `delete`.
pub trait VersionedStore: Send + Sync {
  /// Create the namespace if absent. Idempotent.
  fn open(&self, name: &str) -> Result<Namespace, StoreError>;

  /// Look up a snapshot; `None` on a miss.
  fn get(
    &self,
    namespace: &Namespace,
    identity: &RequestIdentity,
  ) -> Result<Option<ResponseSnapshot>, StoreError>;

  /// Store a snapshot, replacing any existing one for the same identity.
  fn put(
    &self,
    namespace: &Namespace,
    identity: &RequestIdentity,
    snapshot: &ResponseSnapshot,
  ) -> Result<(), StoreError>;

  /// Store several snapshots as one unit: either all are written or none.
  fn put_all(
    &self,
    namespace: &Namespace,
    entries: &[(RequestIdentity, ResponseSnapshot)],
  ) -> Result<(), StoreError> {
    for (identity, snapshot) in entries {
      self.put(namespace, identity, snapshot)?;
    }
    Ok(())
  }

  /// All namespaces currently known to the store.
  fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>, StoreError>;

  /// Remove a namespace and every entry under it. Returns whether it existed.
  fn delete(&self, namespace: &Namespace) -> Result<bool, StoreError>;

  /// Delete every namespace except `keep` and return what was removed.
  ///
  /// Backends that can should do this as one unit, so a failure leaves every
  /// namespace in place.
  fn retain_only(&self, keep: &Namespace) -> Result<Vec<NamespaceInfo>, StoreError> {
    let mut removed = Vec::new();
    for info in self.list_namespaces()? {
      if &info.namespace != keep {
        self.delete(&info.namespace)?;
        removed.push(info);
      }
    }
    Ok(removed)
  }
}

/// Result from a strategy, including the response and where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// Class the request was served as
  pub class: RequestClass,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T, class: RequestClass) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      class,
    }
  }

  pub fn from_cache(data: T, class: RequestClass) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      class,
    }
  }

  /// Served from a stored document because the network failed.
  pub fn offline(data: T, class: RequestClass) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      class,
    }
  }

  pub fn passthrough(data: T, class: RequestClass) -> Self {
    Self {
      data,
      source: CacheSource::Passthrough,
      class,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from the store
  Cache,
  /// Network unavailable, serving a stored fallback document
  Offline,
  /// Forwarded to the network without touching the store
  Passthrough,
}

impl CacheSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Offline => "offline",
      Self::Passthrough => "passthrough",
    }
  }
}
