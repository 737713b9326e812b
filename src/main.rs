use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use url::Url;

use shellcache::cache::{Namespace, NoopStorage, SqliteStorage, VersionedStore};
use shellcache::classify::RequestClassifier;
use shellcache::config::Config;
use shellcache::event::HostHandle;
use shellcache::lifecycle::LifecycleController;
use shellcache::net::{HttpNetwork, InterceptMode, RequestIdentity};

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline-first resource interception with a versioned store")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./shellcache.yaml or $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Store database path, overriding the config file
  #[arg(long)]
  db: Option<PathBuf>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  /// Debug logging
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured manifest and activate it
  Deploy,
  /// Fetch a URL through the interception layer
  Fetch {
    /// Absolute URL, or a path relative to the scope
    url: String,
    /// Treat the request as a navigation
    #[arg(long)]
    navigate: bool,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Request body, forwarded as-is for non-GET requests
    #[arg(short, long)]
    data: Option<String>,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// List store namespaces
  Namespaces,
  /// Delete a namespace and everything stored under it
  Purge { namespace: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.verbose, args.log_file.as_deref())?;

  let mut config = Config::load(args.config.as_deref())?;
  if let Some(db) = args.db.clone() {
    config.store.path = Some(db);
  }

  if config.store.disabled {
    info!("store disabled, nothing will be persisted");
    run(args.command, &config, Arc::new(NoopStorage)).await
  } else {
    let path = config.store_path()?;
    let storage = SqliteStorage::open(&path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;
    run(args.command, &config, Arc::new(storage)).await
  }
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let default = if verbose {
    "shellcache=debug"
  } else {
    "shellcache=info"
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  match log_file {
    Some(path) => {
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
      let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}

async fn run<S: VersionedStore + 'static>(
  command: Command,
  config: &Config,
  storage: Arc<S>,
) -> Result<()> {
  match command {
    Command::Deploy => deploy(config, storage).await,
    Command::Fetch {
      url,
      navigate,
      method,
      data,
      output,
    } => {
      let url = match Url::parse(&url) {
        Ok(url) => url,
        Err(_) => config.resolve(&url)?,
      };
      let mode = if navigate {
        InterceptMode::Navigate
      } else {
        InterceptMode::Resource
      };
      let mut identity = RequestIdentity::new(url, &method, mode);
      if let Some(data) = data {
        identity = identity.with_body(data);
      }
      fetch(config, storage, identity, output.as_deref()).await
    }
    Command::Namespaces => list_namespaces(config, storage.as_ref()),
    Command::Purge { namespace } => {
      let namespace = Namespace::new(namespace)?;
      if storage.delete(&namespace)? {
        println!("deleted {}", namespace);
      } else {
        println!("no namespace named {}", namespace);
      }
      Ok(())
    }
  }
}

fn controller<S: VersionedStore + 'static>(
  config: &Config,
  storage: Arc<S>,
) -> Result<LifecycleController<S, HttpNetwork>> {
  let network = Arc::new(HttpNetwork::new(&config.scope, &config.network)?);
  let classifier = RequestClassifier::new(config.scope.clone(), &config.routing);
  Ok(LifecycleController::new(
    storage,
    network,
    classifier,
    config.manifest()?,
    config.offline_fallbacks()?,
  )?)
}

async fn deploy<S: VersionedStore + 'static>(config: &Config, storage: Arc<S>) -> Result<()> {
  let controller = Arc::new(controller(config, storage)?);
  let host = HostHandle::spawn(Arc::clone(controller.layer().network()));
  host.deploy(Arc::clone(&controller)).await?;
  println!("deployed {}", controller.namespace());
  Ok(())
}

async fn fetch<S: VersionedStore + 'static>(
  config: &Config,
  storage: Arc<S>,
  identity: RequestIdentity,
  output: Option<&Path>,
) -> Result<()> {
  let controller = controller(config, storage)?;
  if !controller.resume().await? {
    warn!(
      namespace = %controller.namespace(),
      "namespace not deployed yet, forwarding to the network (run `shellcache deploy`)"
    );
  }

  let result = controller.intercept(&identity).await;
  // Let background revalidations finish writing before the process exits.
  let pending = controller.layer().in_flight();
  if pending > 0 {
    debug!(pending, "waiting for background revalidation");
  }
  controller.layer().settle().await;
  let result = result?;

  eprintln!(
    "{} {} ({}, {}, {} via {}, {} bytes)",
    result.data.status,
    identity,
    result.data.response_type.as_str(),
    result.data.header("content-type").unwrap_or("-"),
    result.class.as_str(),
    result.source.as_str(),
    result.data.body.len()
  );

  match output {
    Some(path) => std::fs::write(path, &result.data.body)
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
    None => std::io::stdout().write_all(&result.data.body)?,
  }
  Ok(())
}

fn list_namespaces<S: VersionedStore>(config: &Config, storage: &S) -> Result<()> {
  let namespaces = storage.list_namespaces()?;
  if namespaces.is_empty() {
    println!("no namespaces");
    return Ok(());
  }

  for info in namespaces {
    let marker = if info.namespace.as_str() == config.namespace {
      "*"
    } else {
      " "
    };
    println!(
      "{} {:<32} {:>6} entries  opened {}",
      marker,
      info.namespace.as_str(),
      info.entries,
      info.opened_at.format("%Y-%m-%d %H:%M:%S")
    );
  }
  Ok(())
}
