mod cache;
mod config;
mod connectivity;
mod engine;
mod event;
mod fetch;
mod lifecycle;
mod notify;
mod queue;
mod router;

use clap::Parser;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::GenerationStore;

#[derive(Parser, Debug)]
#[command(name = "stashd")]
#[command(about = "Offline-first cache and mutation sync engine")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/stashd/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Override the data directory (databases, logs)
  #[arg(short, long)]
  data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;
  let data_dir = config.resolve_data_dir(args.data_dir.as_deref())?;

  let _log_guard = init_tracing(&data_dir)?;

  let origin = config.origin()?;
  let net = fetch::NetworkClient::new(Duration::from_millis(config.network.deadline_ms))?;
  let store = Arc::new(cache::SqliteStore::open(&data_dir)?);
  let queue = Arc::new(queue::MutationQueue::open(&data_dir)?);

  let lifecycle = lifecycle::LifecycleManager::new(
    Arc::clone(&store),
    net.clone(),
    origin.clone(),
    config.precache.generation.clone(),
    config.manifest_paths(),
  );
  if let Err(e) = lifecycle.boot().await {
    // The previously installed generation, if any, keeps serving
    warn!("cache generation boot failed: {:#}", e);
  }

  if let Some(generation) = store.active_generation()? {
    info!(
      generation = %generation,
      entries = store.entry_count(&generation)?,
      "cache generation serving"
    );
  }

  let pending = queue.len()?;
  if pending > 0 {
    info!(pending, "mutations captured before last shutdown");
  }

  let engine = Arc::new(engine::Engine::new(
    store,
    queue,
    net,
    origin,
    &config.routes,
    &config.precache.offline_page,
  ));

  let mut events =
    event::EventHandler::new(Duration::from_secs(config.sync.wake_interval_secs));

  let shutdown_tx = events.sender();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      let _ = shutdown_tx.send(event::Event::Shutdown);
    }
  });

  engine.run(&mut events).await
}

fn init_tracing(data_dir: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  use color_eyre::eyre::eyre;
  use tracing_subscriber::EnvFilter;

  let log_dir = data_dir.join("logs");
  std::fs::create_dir_all(&log_dir).map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "stashd.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stashd=info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
