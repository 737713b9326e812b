use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use url::Url;

use crate::net::RequestIdentity;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Version tag of the store namespace this deployment fills
  pub namespace: String,
  /// Base URL of the application shell; relative manifest entries resolve against it
  pub scope: Url,
  #[serde(default)]
  pub manifest: ManifestConfig,
  #[serde(default)]
  pub routing: RoutingConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub store: StoreConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestConfig {
  /// Must all be fetched and stored before install succeeds
  #[serde(default)]
  pub essential: Vec<String>,
  /// Fetched opportunistically during install
  #[serde(default)]
  pub deferred: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
  /// URL prefixes served stale-while-revalidate (e.g. "https://unpkg.com/")
  #[serde(default)]
  pub heavy_prefixes: Vec<String>,
  /// CDN hosts served stale-while-revalidate (case-insensitive)
  #[serde(default, deserialize_with = "deserialize_lowercase_set")]
  pub heavy_hosts: BTreeSet<String>,
  /// Path suffixes treated as documents
  #[serde(default = "default_document_suffixes")]
  pub document_suffixes: Vec<String>,
  /// Stored documents tried, after the scope root, when a document request is offline
  #[serde(default)]
  pub offline_fallbacks: Vec<String>,
}

impl Default for RoutingConfig {
  fn default() -> Self {
    Self {
      heavy_prefixes: Vec::new(),
      heavy_hosts: BTreeSet::new(),
      document_suffixes: default_document_suffixes(),
      offline_fallbacks: Vec::new(),
    }
  }
}

fn default_document_suffixes() -> Vec<String> {
  vec![".html".to_string(), ".htm".to_string()]
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  #[serde(default = "default_user_agent")]
  pub user_agent: String,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_timeout_secs(),
      user_agent: default_user_agent(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_user_agent() -> String {
  format!("shellcache/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
  /// SQLite database path (defaults to the user data directory)
  pub path: Option<PathBuf>,
  /// Disable persistence entirely; every lookup misses
  #[serde(default)]
  pub disabled: bool,
}

/// The declarative resource list a deployment installs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceManifest {
  pub namespace: String,
  pub essential: Vec<RequestIdentity>,
  pub deferred: Vec<RequestIdentity>,
}

impl Config {
  /// Read the config from `explicit_path`, or from the first of
  /// `./shellcache.yaml` and `$XDG_CONFIG_HOME/shellcache/config.yaml` that
  /// exists.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = match explicit_path {
      Some(p) if !p.exists() => return Err(eyre!("Config file not found: {}", p.display())),
      Some(p) => p.to_path_buf(),
      None => Self::search_paths()
        .into_iter()
        .find(|p| p.exists())
        .ok_or_else(|| {
          eyre!("No shellcache.yaml found. See shellcache.example.yaml for the format.")
        })?,
    };

    let contents = std::fs::read_to_string(&path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
    Self::from_yaml(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("shellcache.yaml")];
    paths.extend(dirs::config_dir().map(|dir| dir.join("shellcache").join("config.yaml")));
    paths
  }

  /// Parse and validate. Every manifest and fallback entry must resolve
  /// against the scope, so a bad entry fails here rather than at deploy.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.namespace.trim().is_empty() {
      return Err(eyre!("namespace must not be empty"));
    }
    if config.scope.cannot_be_a_base() {
      return Err(eyre!("scope must be a hierarchical URL, got {}", config.scope));
    }
    config.manifest()?;
    config.offline_fallbacks()?;
    Ok(config)
  }

  /// Resolve a manifest/fallback entry against the scope.
  pub fn resolve(&self, entry: &str) -> Result<Url> {
    self
      .scope
      .join(entry)
      .map_err(|e| eyre!("Invalid resource URL '{}': {}", entry, e))
  }

  /// Build the manifest with every entry resolved to an absolute GET identity.
  pub fn manifest(&self) -> Result<ResourceManifest> {
    let resolve_all = |entries: &[String]| -> Result<Vec<RequestIdentity>> {
      entries
        .iter()
        .map(|e| self.resolve(e).map(RequestIdentity::get))
        .collect()
    };

    Ok(ResourceManifest {
      namespace: self.namespace.clone(),
      essential: resolve_all(&self.manifest.essential)?,
      deferred: resolve_all(&self.manifest.deferred)?,
    })
  }

  /// Offline fallback documents as absolute URLs.
  pub fn offline_fallbacks(&self) -> Result<Vec<Url>> {
    self
      .routing
      .offline_fallbacks
      .iter()
      .map(|e| self.resolve(e))
      .collect()
  }

  /// Database path, falling back to the user data directory.
  pub fn store_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.store.path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shellcache").join("store.db"))
  }
}
