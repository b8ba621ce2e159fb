mod cache;
mod config;
mod error;
mod event;
mod host;
mod net;
mod notify;
mod platform;
mod router;
mod script;
mod sync;
mod worker;

#[cfg(test)]
mod test_support;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;
use url::Url;

use cache::SqliteStorage;
use host::LocalHost;
use net::{HttpNetwork, Network};
use script::Replay;
use worker::ServiceWorker;

#[derive(Parser, Debug)]
#[command(name = "offline-worker")]
#[command(about = "Replay worker events against an app origin with offline caching")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-worker/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin the app is served from
  #[arg(short, long)]
  origin: Option<Url>,

  /// Keep the cache in memory instead of the on-disk database
  #[arg(long)]
  in_memory: bool,

  /// Event script, one JSON event per line ("-" reads stdin)
  script: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    config::Config { origin, ..config }
  } else {
    config
  };

  let _log_guard = init_tracing(config.log_dir.as_deref());
  let config = Arc::new(config);

  let storage = if args.in_memory {
    SqliteStorage::in_memory()?
  } else {
    let path = config
      .storage_path
      .clone()
      .or_else(SqliteStorage::default_path)
      .ok_or_else(|| eyre!("Could not determine data directory"))?;
    SqliteStorage::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?
  };

  let network: Arc<dyn Network> = Arc::new(HttpNetwork::new()?);
  let host = Arc::new(LocalHost::new());
  let worker = ServiceWorker::new(
    config.clone(),
    Arc::new(storage),
    network.clone(),
    host.clone(),
    host.clone(),
  );

  let steps = script::parse_script(&read_script(&args.script)?)?;
  let replay = Replay::new(config, worker, host, network);

  for (index, step) in steps.into_iter().enumerate() {
    match replay.run_step(step).await {
      Ok(line) => println!("{}: {}", index + 1, line),
      Err(e) => {
        // Failed events never stop the worker
        error!(step = index + 1, error = %e, "event failed");
        println!("{}: error: {}", index + 1, e);
      }
    }
  }

  Ok(())
}

fn read_script(path: &Path) -> Result<String> {
  if path == Path::new("-") {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    return Ok(input);
  }

  std::fs::read_to_string(path)
    .map_err(|e| eyre!("Failed to read script {}: {}", path.display(), e))
}

/// Log to stderr, or to `log_dir/offline-worker.log` when configured.
fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offline_worker=info"));

  match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::never(dir, "offline-worker.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Some(guard)
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      None
    }
  }
}
