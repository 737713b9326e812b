//! Caching strategies that combine the versioned store with network fetching.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::classify::RequestClass;
use crate::error::{Error, NetworkError, Result};
use crate::net::{FetchOptions, Network, RequestIdentity, ResponseSnapshot};

use super::traits::{CacheResult, Namespace, VersionedStore};

type Revalidation = JoinHandle<Result<ResponseSnapshot, NetworkError>>;

/// Strategy engine bound to one store namespace.
///
/// Every strategy reads and writes only `namespace`; the store and network are
/// shared with whoever else holds them.
pub struct CacheLayer<S: VersionedStore, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  namespace: Namespace,
  /// Stored documents tried, in order, when a document request fails
  fallbacks: Vec<RequestIdentity>,
  /// Background revalidations still in flight
  pending: Arc<Mutex<Vec<Revalidation>>>,
}

impl<S, N> CacheLayer<S, N>
where
  S: VersionedStore + 'static,
  N: Network + 'static,
{
  pub fn new(storage: Arc<S>, network: Arc<N>, namespace: Namespace) -> Self {
    Self {
      storage,
      network,
      namespace,
      fallbacks: Vec::new(),
      pending: Arc::new(Mutex::new(Vec::new())),
    }
  }

  /// Set the offline fallback chain for documents (the scope root first).
  pub fn with_fallbacks(mut self, fallbacks: impl IntoIterator<Item = Url>) -> Self {
    for url in fallbacks {
      let identity = RequestIdentity::get(url);
      if !self.fallbacks.contains(&identity) {
        self.fallbacks.push(identity);
      }
    }
    self
  }

  pub fn namespace(&self) -> &Namespace {
    &self.namespace
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn network(&self) -> &Arc<N> {
    &self.network
  }

  /// Forward the request untouched; the store is never consulted.
  pub async fn passthrough(&self, identity: &RequestIdentity) -> Result<CacheResult<ResponseSnapshot>> {
    let response = self
      .network
      .fetch(identity, FetchOptions::passthrough())
      .await?;
    Ok(CacheResult::passthrough(response, RequestClass::Bypass))
  }

  /// Cache-first.
  ///
  /// 1. Stored snapshot - return it, no network call
  /// 2. Otherwise fetch; a 200 basic/cors answer is stored, then returned
  /// 3. Any other answer is returned without being stored
  pub async fn cache_first(&self, identity: &RequestIdentity) -> Result<CacheResult<ResponseSnapshot>> {
    let class = RequestClass::Default;
    if let Some(cached) = self.lookup(identity) {
      debug!(%identity, "cache hit");
      return Ok(CacheResult::from_cache(cached, class));
    }

    let response = self.network.fetch(identity, FetchOptions::cors()).await?;
    if response.is_cacheable() {
      self.store(identity, &response);
    } else {
      debug!(%identity, status = response.status, "not caching response");
    }
    Ok(CacheResult::from_network(response, class))
  }

  /// Network-first with an offline document fallback.
  ///
  /// Always fetches fresh. On a 2xx the document is stored and returned. On a
  /// transport failure the first stored document in the fallback chain is
  /// served; with none stored the request fails with `OfflineUnavailable`. A
  /// non-2xx answer also prefers a stored document but is returned as-is when
  /// there is nothing to fall back to.
  pub async fn network_first(&self, identity: &RequestIdentity) -> Result<CacheResult<ResponseSnapshot>> {
    let class = RequestClass::Document;
    match self
      .network
      .fetch(identity, FetchOptions::cors().reload())
      .await
    {
      Ok(response) if response.is_ok() => {
        self.store(identity, &response);
        Ok(CacheResult::from_network(response, class))
      }
      Ok(response) => {
        debug!(%identity, status = response.status, "document fetch not ok, trying fallback");
        match self.fallback(identity) {
          Some(cached) => Ok(CacheResult::offline(cached, class)),
          None => Ok(CacheResult::from_network(response, class)),
        }
      }
      Err(e) => {
        debug!(%identity, error = %e, "document fetch failed, trying fallback");
        self
          .fallback(identity)
          .map(|cached| CacheResult::offline(cached, class))
          .ok_or_else(|| Error::OfflineUnavailable {
            url: identity.cache_key().to_string(),
          })
      }
    }
  }

  /// Stale-while-revalidate.
  ///
  /// A network fetch is always started. With a stored snapshot it is returned
  /// immediately and the fetch refreshes the store in the background; without
  /// one the caller waits for the fetch and gets its result or its error.
  pub async fn stale_while_revalidate(
    &self,
    identity: &RequestIdentity,
  ) -> Result<CacheResult<ResponseSnapshot>> {
    let class = RequestClass::Heavy;
    let cached = self.lookup(identity);
    let revalidation = self.spawn_revalidation(identity.clone());

    if let Some(cached) = cached {
      debug!(%identity, "serving stale, revalidating in background");
      self.track(revalidation);
      return Ok(CacheResult::from_cache(cached, class));
    }

    match revalidation.await {
      Ok(Ok(response)) => Ok(CacheResult::from_network(response, class)),
      Ok(Err(e)) => Err(e.into()),
      Err(e) => Err(
        NetworkError::Transport {
          url: identity.cache_key().to_string(),
          message: format!("revalidation task failed: {}", e),
        }
        .into(),
      ),
    }
  }

  /// Wait for every background revalidation started so far.
  pub async fn settle(&self) {
    loop {
      let handles = std::mem::take(&mut *self.pending_guard());
      if handles.is_empty() {
        return;
      }
      for handle in handles {
        let _ = handle.await;
      }
    }
  }

  /// Number of background revalidations that have not finished yet.
  pub fn in_flight(&self) -> usize {
    self
      .pending_guard()
      .iter()
      .filter(|h| !h.is_finished())
      .count()
  }

  /// The detached task owns everything it needs, so dropping the caller's
  /// future never cancels the store write.
  fn spawn_revalidation(&self, identity: RequestIdentity) -> Revalidation {
    let storage = Arc::clone(&self.storage);
    let network = Arc::clone(&self.network);
    let namespace = self.namespace.clone();

    tokio::spawn(async move {
      let response = network.fetch(&identity, FetchOptions::cors()).await?;
      if !response.is_ok() {
        debug!(%identity, status = response.status, "revalidation discarded");
        return Err(NetworkError::status(identity.cache_key(), response.status));
      }
      if let Err(e) = storage.put(&namespace, &identity, &response) {
        warn!(%identity, namespace = %namespace, error = %e, "failed to store revalidated response");
      }
      Ok::<_, NetworkError>(response)
    })
  }

  fn track(&self, handle: Revalidation) {
    let mut pending = self.pending_guard();
    pending.retain(|h| !h.is_finished());
    pending.push(handle);
  }

  fn pending_guard(&self) -> std::sync::MutexGuard<'_, Vec<Revalidation>> {
    self.pending.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Store lookups never fail a request; an unreadable entry counts as a miss.
  fn lookup(&self, identity: &RequestIdentity) -> Option<ResponseSnapshot> {
    match self.storage.get(&self.namespace, identity) {
      Ok(found) => found,
      Err(e) => {
        warn!(%identity, namespace = %self.namespace, error = %e, "store read failed");
        None
      }
    }
  }

  /// Persistence is best-effort outside of install.
  fn store(&self, identity: &RequestIdentity, response: &ResponseSnapshot) {
    if let Err(e) = self.storage.put(&self.namespace, identity, response) {
      warn!(%identity, namespace = %self.namespace, error = %e, "failed to store response");
    }
  }

  fn fallback(&self, identity: &RequestIdentity) -> Option<ResponseSnapshot> {
    std::iter::once(identity)
      .chain(self.fallbacks.iter())
      .find_map(|candidate| self.lookup(candidate))
  }
}

impl<S: VersionedStore, N: Network> Clone for CacheLayer<S, N> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      namespace: self.namespace.clone(),
      fallbacks: self.fallbacks.clone(),
      pending: Arc::clone(&self.pending),
    }
  }
}
