//! Install / activate / intercept lifecycle for one store namespace.

use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::{CacheLayer, CacheResult, Namespace, VersionedStore};
use crate::classify::{RequestClass, RequestClassifier};
use crate::config::ResourceManifest;
use crate::error::{Error, InstallError, NetworkError, Result};
use crate::net::{FetchOptions, Network, RequestIdentity, ResponseSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Created, install not finished
  Installing,
  /// Installed, waiting to take control
  Waiting,
  /// Serving requests
  Active,
  /// Superseded by a newer controller
  Retiring,
  /// Install failed; never serves requests
  Redundant,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Installing => "installing",
      Self::Waiting => "waiting",
      Self::Active => "active",
      Self::Retiring => "retiring",
      Self::Redundant => "redundant",
    };
    f.write_str(s)
  }
}

/// Owns one namespace of the store and everything needed to serve it.
pub struct LifecycleController<S: VersionedStore, N: Network> {
  manifest: ResourceManifest,
  classifier: RequestClassifier,
  layer: CacheLayer<S, N>,
  state: RwLock<LifecycleState>,
}

impl<S, N> LifecycleController<S, N>
where
  S: VersionedStore + 'static,
  N: Network + 'static,
{
  /// `fallbacks` are extra stored documents tried after the scope root when a
  /// document request cannot reach the network.
  pub fn new(
    storage: Arc<S>,
    network: Arc<N>,
    classifier: RequestClassifier,
    manifest: ResourceManifest,
    fallbacks: Vec<url::Url>,
  ) -> Result<Self> {
    let namespace = Namespace::new(manifest.namespace.clone())?;
    let chain = std::iter::once(classifier.root().clone()).chain(fallbacks);
    let layer = CacheLayer::new(storage, network, namespace).with_fallbacks(chain);

    Ok(Self {
      manifest,
      classifier,
      layer,
      state: RwLock::new(LifecycleState::Installing),
    })
  }

  pub fn namespace(&self) -> &Namespace {
    self.layer.namespace()
  }

  pub fn layer(&self) -> &CacheLayer<S, N> {
    &self.layer
  }

  pub async fn state(&self) -> LifecycleState {
    *self.state.read().await
  }

  /// Pre-populate the namespace from the manifest.
  ///
  /// Essential resources are fetched concurrently and written in one batch
  /// only if every one of them succeeded. Deferred resources are best-effort.
  /// Running install again with the same manifest rewrites the same entries.
  pub async fn install(&self) -> Result<()> {
    let previous = {
      let mut state = self.state.write().await;
      let previous = *state;
      if previous != LifecycleState::Active {
        *state = LifecycleState::Installing;
      }
      previous
    };

    info!(
      namespace = %self.namespace(),
      essential = self.manifest.essential.len(),
      deferred = self.manifest.deferred.len(),
      "installing"
    );

    let result = self.populate().await;

    let mut state = self.state.write().await;
    match result {
      Ok(()) => {
        if previous != LifecycleState::Active {
          *state = LifecycleState::Waiting;
        }
        info!(namespace = %self.namespace(), "install complete");
        Ok(())
      }
      Err(e) => {
        if previous != LifecycleState::Active {
          *state = LifecycleState::Redundant;
        }
        warn!(namespace = %self.namespace(), error = %e, "install failed");
        Err(e.into())
      }
    }
  }

  async fn populate(&self) -> Result<(), InstallError> {
    let storage = self.layer.storage();

    let fetched = join_all(
      self
        .manifest
        .essential
        .iter()
        .map(|identity| self.fetch_for_install(identity)),
    )
    .await;

    let mut entries = Vec::with_capacity(fetched.len());
    let mut failures = Vec::new();
    for (identity, result) in self.manifest.essential.iter().zip(fetched) {
      match result {
        Ok(response) => entries.push((identity.clone(), response)),
        Err(e) => failures.push((identity.cache_key().to_string(), e)),
      }
    }
    if !failures.is_empty() {
      return Err(InstallError::EssentialFetch(failures));
    }

    let namespace = storage.open(self.namespace().as_str())?;
    storage.put_all(&namespace, &entries)?;

    let deferred = self.manifest.deferred.iter().map(|identity| {
      let namespace = &namespace;
      async move {
        let stored = match self.fetch_for_install(identity).await {
          Ok(response) => storage
            .put(namespace, identity, &response)
            .map_err(|e| e.to_string()),
          Err(e) => Err(e.to_string()),
        };
        if let Err(e) = stored {
          warn!(%identity, error = %e, "skipping deferred resource");
        }
      }
    });
    join_all(deferred).await;

    Ok(())
  }

  async fn fetch_for_install(&self, identity: &RequestIdentity) -> Result<ResponseSnapshot, NetworkError> {
    let response = self
      .layer
      .network()
      .fetch(identity, FetchOptions::cors())
      .await?;
    if !response.is_ok() {
      return Err(NetworkError::status(identity.cache_key(), response.status));
    }
    Ok(response)
  }

  /// Drop every other namespace, then take control.
  ///
  /// The state lock is held for the whole deletion, so no request is
  /// classified until the store holds only this namespace.
  pub async fn activate(&self) -> Result<()> {
    let mut state = self.state.write().await;
    match *state {
      LifecycleState::Active => return Ok(()),
      LifecycleState::Waiting => {}
      other => {
        return Err(Error::NotWaiting {
          namespace: self.namespace().to_string(),
          state: other.to_string(),
        })
      }
    }

    // One transaction: on failure every old namespace is still there and the
    // previous controller keeps serving from its own.
    for info in self.layer.storage().retain_only(self.namespace())? {
      info!(namespace = %info.namespace, entries = info.entries, "deleted old namespace");
    }

    *state = LifecycleState::Active;
    info!(namespace = %self.namespace(), "active");
    Ok(())
  }

  /// Take control of a namespace installed by an earlier run without
  /// fetching the manifest again. Returns false if it was never installed.
  pub async fn resume(&self) -> Result<bool> {
    let mut state = self.state.write().await;
    let installed = self
      .layer
      .storage()
      .list_namespaces()?
      .iter()
      .any(|info| &info.namespace == self.namespace());
    if installed {
      *state = LifecycleState::Active;
      debug!(namespace = %self.namespace(), "resumed");
    }
    Ok(installed)
  }

  /// Mark this controller as superseded. It stops serving from the store.
  pub async fn retire(&self) {
    let mut state = self.state.write().await;
    if *state == LifecycleState::Active || *state == LifecycleState::Waiting {
      *state = LifecycleState::Retiring;
      info!(namespace = %self.namespace(), "retiring");
    }
  }

  /// Serve one request.
  ///
  /// Non-GET requests, and every request while this controller is not
  /// active, go straight to the network without touching the store.
  pub async fn intercept(&self, identity: &RequestIdentity) -> Result<CacheResult<ResponseSnapshot>> {
    let class = self.classifier.classify(identity);
    if class == RequestClass::Bypass {
      return self.layer.passthrough(identity).await;
    }

    let state = self.state().await;
    if state != LifecycleState::Active {
      debug!(%identity, %state, "not in control, forwarding");
      return self.layer.passthrough(identity).await;
    }

    debug!(%identity, class = class.as_str(), "intercepted");
    match class {
      RequestClass::Document => self.layer.network_first(identity).await,
      RequestClass::Heavy => self.layer.stale_while_revalidate(identity).await,
      RequestClass::Default => self.layer.cache_first(identity).await,
      RequestClass::Bypass => self.layer.passthrough(identity).await,
    }
  }
}
