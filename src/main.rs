use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use stowaway::cache::{CacheStorage, NoopStorage, SqliteStorage};
use stowaway::config::{Config, OfflinePolicy};
use stowaway::event::EventHandler;
use stowaway::net::{HttpNetwork, Request};
use stowaway::{telemetry, Event, Outcome, Worker};

#[derive(Parser, Debug)]
#[command(name = "stowaway")]
#[command(about = "Offline-first request interception with versioned caches")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./stowaway.yaml or $XDG_CONFIG_HOME/stowaway/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the static manifest into the current-version store
  Install,
  /// Delete stores left behind by earlier versions
  Activate,
  /// Serve one request through the cache
  Fetch {
    /// Absolute URL or path relative to the configured origin
    target: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Request header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Request body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Replay queued writes
  Sync {
    #[arg(long, default_value = stowaway::config::SYNC_TAG)]
    tag: String,
  },
  /// List queued writes
  Queue,
  /// List stores and their entry counts
  Stores,
  /// Read newline-delimited JSON events from stdin, one outcome per line on stdout
  Run,
}

#[derive(Serialize)]
struct StoreSummary {
  name: String,
  entries: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _guard = telemetry::init(&config.log)?;

  let network = Arc::new(HttpNetwork::new(&config.network)?);

  if config.cache.enabled {
    let storage = match &config.database {
      Some(path) => SqliteStorage::open_at(path)?,
      None => SqliteStorage::open()?,
    };
    run(args.command, Arc::new(storage), network, &config).await
  } else {
    warn!("caching disabled, every request goes to the network");
    run(args.command, Arc::new(NoopStorage), network, &config).await
  }
}

async fn run<S: CacheStorage>(
  command: Command,
  storage: Arc<S>,
  network: Arc<HttpNetwork>,
  config: &Config,
) -> Result<()> {
  let policy = OfflinePolicy::default();
  let worker = Worker::new(Arc::clone(&storage), network, config, &policy);

  let result = execute(command, &worker, storage.as_ref(), config).await;

  // Teardown only after every scheduled cache write has landed
  worker.shutdown().await;
  result
}

async fn execute<S: CacheStorage>(
  command: Command,
  worker: &Worker<S, HttpNetwork>,
  storage: &S,
  config: &Config,
) -> Result<()> {
  match command {
    Command::Install => print(&worker.dispatch(Event::Install).await),
    Command::Activate => print(&worker.dispatch(Event::Activate).await),
    Command::Fetch {
      target,
      method,
      headers,
      data,
    } => {
      let mut request = Request::new(
        &method,
        config.resolve_target(&target)?,
        data.unwrap_or_default(),
      );
      for header in headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Invalid header (expected \"Name: value\"): {}", header))?;
        request = request.with_header(name.trim(), value.trim());
      }
      print(&worker.dispatch(Event::Fetch(request)).await)
    }
    Command::Sync { tag } => print(&worker.dispatch(Event::Sync { tag }).await),
    Command::Queue => {
      let queued: Vec<Request> = worker
        .queue()
        .pending()?
        .into_iter()
        .map(|key| key.request().clone())
        .collect();
      print(&queued)
    }
    Command::Stores => {
      let mut summaries = Vec::new();
      for name in storage.store_names()? {
        let entries = storage.keys(&name)?.len();
        summaries.push(StoreSummary { name, entries });
      }
      print(&summaries)
    }
    Command::Run => {
      let mut events = EventHandler::stdin();
      while let Some(event) = events.next().await {
        let outcome = match event {
          Ok(event) => worker.dispatch(event).await,
          Err(e) => Outcome::Rejected {
            error: e.to_string(),
          },
        };
        println!("{}", serde_json::to_string(&outcome)?);
      }
      Ok(())
    }
  }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
  let json =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to serialize output: {}", e))?;
  println!("{}", json);
  Ok(())
}
