//! Error taxonomy for the interception layer.

use thiserror::Error;

/// Failures talking to the network.
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
  /// Connection refused, DNS failure, reset, etc.
  #[error("network unreachable for {url}: {message}")]
  Transport { url: String, message: String },

  /// The server answered, but not with a success status
  #[error("{url} returned status {status}")]
  Status { url: String, status: u16 },

  /// The request did not complete in time
  #[error("request to {url} timed out")]
  Timeout { url: String },

  /// The request could not be built (bad method, bad header, ...)
  #[error("invalid request for {url}: {message}")]
  InvalidRequest { url: String, message: String },
}

impl NetworkError {
  /// Build the error used when a response is received but is not a 2xx.
  pub fn status(url: impl Into<String>, status: u16) -> Self {
    Self::Status {
      url: url.into(),
      status,
    }
  }
}

/// Failures of the versioned store.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("sqlite: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to encode snapshot metadata: {0}")]
  Serialization(#[from] serde_json::Error),

  /// Writes are refused for namespaces that were never opened or were deleted.
  #[error("namespace '{0}' is not open")]
  UnknownNamespace(String),

  #[error("invalid namespace name '{0}'")]
  InvalidNamespace(String),

  #[error("store lock poisoned")]
  LockPoisoned,

  #[error("failed to prepare store location: {0}")]
  Io(#[from] std::io::Error),
}

/// Install could not pre-populate the essential resource set.
#[derive(Debug, Error)]
pub enum InstallError {
  #[error("failed to fetch {} essential resource(s): {}", .0.len(), join_failures(.0))]
  EssentialFetch(Vec<(String, NetworkError)>),

  #[error("failed to store essential resources: {0}")]
  Store(#[from] StoreError),
}

fn join_failures(failures: &[(String, NetworkError)]) -> String {
  failures
    .iter()
    .map(|(url, err)| format!("{} ({})", url, err))
    .collect::<Vec<_>>()
    .join(", ")
}

/// Top-level error surfaced by the lifecycle hooks.
#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Network(#[from] NetworkError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Install(#[from] InstallError),

  /// A document request failed and nothing usable was stored for it.
  #[error("offline and no cached document is available for {url}")]
  OfflineUnavailable { url: String },

  /// `activate` was called before a successful `install`.
  #[error("controller for '{namespace}' cannot activate from state {state}")]
  NotWaiting { namespace: String, state: String },

  /// The host event loop has shut down.
  #[error("host is no longer running")]
  HostClosed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
