//! Test doubles for the network port and the store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Mutex};
use url::Url;

use crate::cache::{Namespace, NamespaceInfo, SqliteStorage, VersionedStore};
use crate::error::{NetworkError, StoreError};
use crate::net::{FetchOptions, Network, RequestIdentity, ResponseSnapshot, ResponseType};

pub const SCOPE: &str = "https://app.test/shell/";

pub fn url(path: &str) -> Url {
  Url::parse(SCOPE).unwrap().join(path).unwrap()
}

pub fn snapshot(body: &'static str) -> ResponseSnapshot {
  ResponseSnapshot::new(200, ResponseType::Basic, body)
}

/// Network that answers from a script; unknown URLs are unreachable.
#[derive(Default)]
pub struct MockNetwork {
  script: Mutex<HashMap<String, Result<ResponseSnapshot, NetworkError>>>,
  calls: Mutex<Vec<(String, String, FetchOptions)>>,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &Url, response: ResponseSnapshot) {
    self
      .script
      .lock()
      .unwrap()
      .insert(url.to_string(), Ok(response));
  }

  pub fn fail(&self, url: &Url) {
    self.script.lock().unwrap().insert(
      url.to_string(),
      Err(NetworkError::Transport {
        url: url.to_string(),
        message: "connection refused".to_string(),
      }),
    );
  }

  pub fn calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn calls_for(&self, url: &Url) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|(u, _, _)| u == url.as_str())
      .count()
  }

  pub fn last_call(&self) -> Option<(String, String, FetchOptions)> {
    self.calls.lock().unwrap().last().cloned()
  }
}

#[async_trait]
impl Network for MockNetwork {
  async fn fetch(
    &self,
    identity: &RequestIdentity,
    options: FetchOptions,
  ) -> Result<ResponseSnapshot, NetworkError> {
    let key = identity.cache_key().to_string();
    self
      .calls
      .lock()
      .unwrap()
      .push((key.clone(), identity.method().to_string(), options));

    let scripted = self.script.lock().unwrap().get(&key).cloned();
    scripted.unwrap_or_else(|| {
      Err(NetworkError::Transport {
        url: key,
        message: "no route".to_string(),
      })
    })
  }
}

/// In-memory SQLite store that counts every call made to it.
pub struct SpyStore {
  inner: SqliteStorage,
  reads: AtomicUsize,
  writes: AtomicUsize,
  retain_gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
  retain_fails: AtomicBool,
}

impl SpyStore {
  pub fn new() -> Self {
    Self {
      inner: SqliteStorage::open_in_memory().unwrap(),
      reads: AtomicUsize::new(0),
      writes: AtomicUsize::new(0),
      retain_gate: Mutex::new(None),
      retain_fails: AtomicBool::new(false),
    }
  }

  pub fn reads(&self) -> usize {
    self.reads.load(Ordering::SeqCst)
  }

  pub fn writes(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }

  pub fn reset(&self) {
    self.reads.store(0, Ordering::SeqCst);
    self.writes.store(0, Ordering::SeqCst);
  }

  /// The next `retain_only` signals the returned receiver once it is running,
  /// then blocks until the returned sender fires.
  pub fn hold_retain(&self) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    *self.retain_gate.lock().unwrap() = Some((entered_tx, release_rx));
    (entered_rx, release_tx)
  }

  /// Every later `retain_only` fails without touching the store.
  pub fn fail_retain(&self) {
    self.retain_fails.store(true, Ordering::SeqCst);
  }
}

impl VersionedStore for SpyStore {
  fn open(&self, name: &str) -> Result<Namespace, StoreError> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.inner.open(name)
  }

  fn get(
    &self,
    namespace: &Namespace,
    identity: &RequestIdentity,
  ) -> Result<Option<ResponseSnapshot>, StoreError> {
    self.reads.fetch_add(1, Ordering::SeqCst);
    self.inner.get(namespace, identity)
  }

  fn put(
    &self,
    namespace: &Namespace,
    identity: &RequestIdentity,
    snapshot: &ResponseSnapshot,
  ) -> Result<(), StoreError> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.inner.put(namespace, identity, snapshot)
  }

  fn put_all(
    &self,
    namespace: &Namespace,
    entries: &[(RequestIdentity, ResponseSnapshot)],
  ) -> Result<(), StoreError> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.inner.put_all(namespace, entries)
  }

  fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>, StoreError> {
    self.reads.fetch_add(1, Ordering::SeqCst);
    self.inner.list_namespaces()
  }

  fn delete(&self, namespace: &Namespace) -> Result<bool, StoreError> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.inner.delete(namespace)
  }

  fn retain_only(&self, keep: &Namespace) -> Result<Vec<NamespaceInfo>, StoreError> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    if self.retain_fails.load(Ordering::SeqCst) {
      return Err(StoreError::Io(std::io::Error::other("disk full")));
    }
    let gate = self.retain_gate.lock().unwrap().take();
    if let Some((entered, release)) = gate {
      let _ = entered.send(());
      let _ = release.recv();
    }
    self.inner.retain_only(keep)
  }
}
