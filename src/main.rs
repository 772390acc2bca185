use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};
use url::Url;

use tsd_shell::cache::{CacheStorage, RequestKey, SqliteStorage};
use tsd_shell::config::Config;
use tsd_shell::gateway::{endpoint_from_page_url, Gateway, HttpTransport};
use tsd_shell::logging;
use tsd_shell::worker::{
  FetchDecision, FetchRequest, HttpNetwork, OfflineCache, WorkerSettings,
};

#[derive(Parser, Debug)]
#[command(name = "tsd")]
#[command(about = "Offline shell cache and backend gateway for the TSD client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tsd-shell/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Override the worker version from the config
  #[arg(long, global = true)]
  version_tag: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the shell manifest, then activate
  Install,
  /// Delete caches from other versions
  Activate,
  /// Fetch a URL through the offline cache
  Fetch {
    /// Absolute URL, or a path relative to the origin
    url: String,
    /// Treat as a full-page navigation (network first)
    #[arg(long)]
    navigate: bool,
  },
  /// List cache generations and their entries
  Caches,
  /// Call a backend action
  Call {
    action: String,
    /// Parameters as a JSON object
    params: Option<String>,
  },
}

type Worker = OfflineCache<SqliteStorage, HttpNetwork>;

fn build_worker(config: &Config) -> Result<Worker> {
  let settings = WorkerSettings::from_config(config)?;
  let storage = SqliteStorage::open(config.database.as_deref())?;
  let network = HttpNetwork::new(&settings.origin, config.network_timeout())?;
  Ok(OfflineCache::new(storage, network, settings))
}

async fn install(config: &Config) -> Result<()> {
  let worker = build_worker(config)?;
  let report = worker.install().await;
  let deleted = worker.activate();

  println!(
    "precached {} of {} assets into {}",
    report.stored.len(),
    report.stored.len() + report.failed.len(),
    worker.generations().precache
  );
  for url in &report.failed {
    println!("  failed: {}", url);
  }
  for name in &deleted {
    println!("deleted {}", name);
  }
  Ok(())
}

fn activate(config: &Config) -> Result<()> {
  let worker = build_worker(config)?;
  for name in worker.activate() {
    println!("deleted {}", name);
  }
  Ok(())
}

async fn fetch(config: &Config, target: &str, navigate: bool) -> Result<()> {
  let worker = build_worker(config)?;
  worker.resume()?;

  let url = match Url::parse(target) {
    Ok(url) => url,
    Err(_) => config
      .origin_url()?
      .join(target)
      .map_err(|e| eyre!("Invalid URL '{}': {}", target, e))?,
  };
  let request = if navigate {
    FetchRequest::navigate(url)
  } else {
    FetchRequest::get(url)
  };

  let mut client = worker.subscribe();
  let outcome = match worker.handle_fetch(request).await {
    FetchDecision::Respond(outcome) => outcome,
    FetchDecision::Passthrough => {
      return Err(eyre!("{} is not handled by the offline cache", target));
    }
  };

  eprintln!("{} ({:?})", outcome.response.status, outcome.source);
  std::io::stdout()
    .write_all(&outcome.response.body)
    .map_err(|e| eyre!("Failed to write response: {}", e))?;

  // Let the background refresh finish before the process exits
  if let Some(revalidation) = outcome.revalidation {
    match revalidation.await {
      Ok(result) => info!(?result, "Revalidation finished"),
      Err(e) => warn!(error = %e, "Revalidation task aborted"),
    }
  }
  while let Ok(notification) = client.try_recv() {
    let json = serde_json::to_string(&notification)
      .map_err(|e| eyre!("Failed to serialize notification: {}", e))?;
    eprintln!("{}", json);
  }
  Ok(())
}

fn list_caches(config: &Config) -> Result<()> {
  let storage = SqliteStorage::open(config.database.as_deref())?;
  for name in storage.cache_names()? {
    println!("{}", name);
    for key in storage.entry_keys(&name)? {
      match storage.match_entry(&name, &RequestKey::parse(&key)?)? {
        Some(entry) => println!(
          "  {}  {} {}",
          key,
          entry.response.status,
          entry.cached_at.format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("  {}", key),
      }
    }
  }
  Ok(())
}

async fn call(config: &Config, action: &str, params: Option<&str>) -> Result<()> {
  let params: Value = match params {
    Some(raw) => serde_json::from_str(raw).map_err(|e| eyre!("Invalid params JSON: {}", e))?,
    None => Value::Null,
  };

  let endpoint = endpoint_from_page_url(&config.page_url()?, &config.backend.api_path)?;
  let gateway = Gateway::new(HttpTransport::new(config.network_timeout())?, endpoint);
  let response = gateway.call(action, params).await?;

  let json = serde_json::to_string_pretty(&response)
    .map_err(|e| eyre!("Failed to serialize response: {}", e))?;
  println!("{}", json);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override version if specified on command line
  let config = if let Some(version) = args.version_tag {
    Config { version, ..config }
  } else {
    config
  };

  let _guard = logging::init(config.log_dir.as_deref())?;

  match args.command {
    Command::Install => install(&config).await,
    Command::Activate => activate(&config),
    Command::Fetch { url, navigate } => fetch(&config, &url, navigate).await,
    Command::Caches => list_caches(&config),
    Command::Call { action, params } => call(&config, &action, params.as_deref()).await,
  }
}
