use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::cache::{CacheResult, VersionedStore};
use crate::classify::RequestClass;
use crate::error::{Error, Result};
use crate::lifecycle::LifecycleController;
use crate::net::{FetchOptions, Network, RequestIdentity, ResponseSnapshot};

type Controller<S, N> = Arc<LifecycleController<S, N>>;

/// Lifecycle events delivered to the host loop
enum HostEvent<S: VersionedStore, N: Network> {
  /// Install a new controller; it waits until the next `Activate`
  Install {
    controller: Controller<S, N>,
    respond_to: oneshot::Sender<Result<()>>,
  },
  /// Promote the waiting controller
  Activate { respond_to: oneshot::Sender<Result<()>> },
  /// An intercepted request
  Fetch {
    request: RequestIdentity,
    respond_to: oneshot::Sender<Result<CacheResult<ResponseSnapshot>>>,
  },
}

/// Host runtime state: at most one active and one waiting controller.
struct Host<S: VersionedStore, N: Network> {
  network: Arc<N>,
  active: Option<Controller<S, N>>,
  waiting: Option<Controller<S, N>>,
}

impl<S, N> Host<S, N>
where
  S: VersionedStore + 'static,
  N: Network + 'static,
{
  /// Install and activate are awaited inline, so no request queued behind
  /// them is dispatched until they finish. Fetches run concurrently.
  async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HostEvent<S, N>>) {
    while let Some(event) = rx.recv().await {
      match event {
        HostEvent::Install {
          controller,
          respond_to,
        } => {
          let result = controller.install().await;
          if result.is_ok() {
            if let Some(previous) = self.waiting.replace(controller) {
              previous.retire().await;
            }
          }
          let _ = respond_to.send(result);
        }
        HostEvent::Activate { respond_to } => {
          let _ = respond_to.send(self.activate_waiting().await);
        }
        HostEvent::Fetch {
          request,
          respond_to,
        } => {
          let active = self.active.clone();
          let network = Arc::clone(&self.network);
          tokio::spawn(async move {
            let result = match active {
              Some(controller) => controller.intercept(&request).await,
              None => uncontrolled(network.as_ref(), &request).await,
            };
            let _ = respond_to.send(result);
          });
        }
      }
    }
    debug!("host loop stopped");
  }

  async fn activate_waiting(&mut self) -> Result<()> {
    let Some(controller) = self.waiting.take() else {
      debug!("nothing waiting to activate");
      return Ok(());
    };

    match controller.activate().await {
      Ok(()) => {
        if let Some(previous) = self.active.replace(controller) {
          previous.retire().await;
        }
        Ok(())
      }
      Err(e) => {
        warn!(namespace = %controller.namespace(), error = %e, "activation failed");
        self.waiting = Some(controller);
        Err(e)
      }
    }
  }
}

async fn uncontrolled<N: Network>(
  network: &N,
  request: &RequestIdentity,
) -> Result<CacheResult<ResponseSnapshot>> {
  let response = network.fetch(request, FetchOptions::passthrough()).await?;
  Ok(CacheResult::passthrough(response, RequestClass::Bypass))
}

/// Handle used to deliver lifecycle events to a running host
pub struct HostHandle<S: VersionedStore, N: Network> {
  tx: mpsc::UnboundedSender<HostEvent<S, N>>,
}

impl<S, N> HostHandle<S, N>
where
  S: VersionedStore + 'static,
  N: Network + 'static,
{
  /// Start the host loop. Requests are forwarded uncontrolled until a
  /// controller has been installed and activated.
  pub fn spawn(network: Arc<N>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let host = Host {
      network,
      active: None,
      waiting: None,
    };
    tokio::spawn(host.run(rx));
    Self { tx }
  }

  pub async fn install(&self, controller: Controller<S, N>) -> Result<()> {
    let (respond_to, rx) = oneshot::channel();
    self.send(HostEvent::Install {
      controller,
      respond_to,
    })?;
    rx.await.map_err(|_| Error::HostClosed)?
  }

  pub async fn activate(&self) -> Result<()> {
    let (respond_to, rx) = oneshot::channel();
    self.send(HostEvent::Activate { respond_to })?;
    rx.await.map_err(|_| Error::HostClosed)?
  }

  /// Install then activate. A failed install leaves the current controller
  /// in charge.
  pub async fn deploy(&self, controller: Controller<S, N>) -> Result<()> {
    let namespace = controller.namespace().clone();
    self.install(controller).await?;
    self.activate().await?;
    info!(%namespace, "deployed");
    Ok(())
  }

  pub async fn fetch(&self, request: RequestIdentity) -> Result<CacheResult<ResponseSnapshot>> {
    let (respond_to, rx) = oneshot::channel();
    self.send(HostEvent::Fetch {
      request,
      respond_to,
    })?;
    rx.await.map_err(|_| Error::HostClosed)?
  }

  fn send(&self, event: HostEvent<S, N>) -> Result<()> {
    self.tx.send(event).map_err(|_| Error::HostClosed)
  }
}

impl<S: VersionedStore, N: Network> Clone for HostHandle<S, N> {
  fn clone(&self) -> Self {
    Self {
      tx: self.tx.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, Namespace};
  use crate::classify::RequestClassifier;
  use crate::config::{ResourceManifest, RoutingConfig};
  use crate::testing::{snapshot, url, MockNetwork, SpyStore, SCOPE};

  fn controller(
    store: &Arc<SpyStore>,
    network: &Arc<MockNetwork>,
    namespace: &str,
  ) -> Controller<SpyStore, MockNetwork> {
    let classifier =
      RequestClassifier::new(url::Url::parse(SCOPE).unwrap(), &RoutingConfig::default());
    let manifest = ResourceManifest {
      namespace: namespace.to_string(),
      essential: vec![
        RequestIdentity::get(url("./")),
        RequestIdentity::get(url("app.js")),
      ],
      deferred: Vec::new(),
    };
    Arc::new(
      LifecycleController::new(
        Arc::clone(store),
        Arc::clone(network),
        classifier,
        manifest,
        Vec::new(),
      )
      .unwrap(),
    )
  }

  #[tokio::test]
  async fn test_fetch_before_deploy_is_uncontrolled() {
    let network = Arc::new(MockNetwork::new());
    network.respond(&url("app.js"), snapshot("app"));
    let host: HostHandle<SpyStore, MockNetwork> = HostHandle::spawn(Arc::clone(&network));

    let result = host.fetch(RequestIdentity::get(url("app.js"))).await.unwrap();
    assert_eq!(result.source, CacheSource::Passthrough);
  }

  #[tokio::test]
  async fn test_deploy_takes_control() {
    let store = Arc::new(SpyStore::new());
    let network = Arc::new(MockNetwork::new());
    network.respond(&url("./"), snapshot("root v1"));
    network.respond(&url("app.js"), snapshot("app v1"));
    let host = HostHandle::spawn(Arc::clone(&network));

    host.deploy(controller(&store, &network, "v1")).await.unwrap();

    network.fail(&url("app.js"));
    let result = host.fetch(RequestIdentity::get(url("app.js"))).await.unwrap();
    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.body, "app v1");
  }

  #[tokio::test]
  async fn test_failed_install_keeps_previous_version() {
    let store = Arc::new(SpyStore::new());
    let network = Arc::new(MockNetwork::new());
    network.respond(&url("./"), snapshot("root v1"));
    network.respond(&url("app.js"), snapshot("app v1"));
    let host = HostHandle::spawn(Arc::clone(&network));
    host.deploy(controller(&store, &network, "v1")).await.unwrap();

    network.fail(&url("app.js"));
    let err = host
      .deploy(controller(&store, &network, "v2"))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Install(_)));

    let names: Vec<Namespace> = store
      .list_namespaces()
      .unwrap()
      .into_iter()
      .map(|i| i.namespace)
      .collect();
    assert_eq!(names, vec![Namespace::new("v1").unwrap()]);

    let result = host.fetch(RequestIdentity::get(url("app.js"))).await.unwrap();
    assert_eq!(result.data.body, "app v1");
  }

  #[tokio::test]
  async fn test_new_deploy_replaces_and_retires_old() {
    let store = Arc::new(SpyStore::new());
    let network = Arc::new(MockNetwork::new());
    network.respond(&url("./"), snapshot("root v1"));
    network.respond(&url("app.js"), snapshot("app v1"));
    let host = HostHandle::spawn(Arc::clone(&network));

    let v1 = controller(&store, &network, "v1");
    host.deploy(Arc::clone(&v1)).await.unwrap();

    network.respond(&url("app.js"), snapshot("app v2"));
    host.deploy(controller(&store, &network, "v2")).await.unwrap();

    assert_eq!(v1.state().await, crate::lifecycle::LifecycleState::Retiring);
    let names: Vec<String> = store
      .list_namespaces()
      .unwrap()
      .into_iter()
      .map(|i| i.namespace.to_string())
      .collect();
    assert_eq!(names, vec!["v2"]);

    network.fail(&url("app.js"));
    let result = host.fetch(RequestIdentity::get(url("app.js"))).await.unwrap();
    assert_eq!(result.data.body, "app v2");
  }

  #[tokio::test]
  async fn test_activate_with_nothing_waiting_is_noop() {
    let network = Arc::new(MockNetwork::new());
    let host: HostHandle<SpyStore, MockNetwork> = HostHandle::spawn(network);
    host.activate().await.unwrap();
  }
}
