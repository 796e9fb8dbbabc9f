mod commands;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use notelab_offline::config::Config;
use notelab_offline::notes::{ApiClient, RemoteUnitFetcher};
use notelab_offline::{DownloadOptions, OfflineCache, SqliteStorage};

#[derive(Parser, Debug)]
#[command(name = "notelab-offline")]
#[command(about = "Download NoteLab subjects for offline reading")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/notelab/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Write logs to a daily-rotated file in this directory instead of stderr
  #[arg(long)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Download a subject described by a manifest file
  Download { manifest: PathBuf },
  /// Report whether a subject is available offline
  Status { subject_id: String },
  /// Show a cached subject
  Show { subject_id: String },
  /// Write the cached unit files of a subject to a directory
  Export { subject_id: String, dir: PathBuf },
  /// List downloaded subjects
  List,
  /// Delete a downloaded subject
  Remove { subject_id: String },
}

fn init_tracing(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

  match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "notelab-offline.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
      Some(guard)
    }
    None => {
      let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
      None
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing(args.log_dir.as_ref());

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let storage = match &config.cache.path {
    Some(path) => SqliteStorage::open_at(path),
    None => SqliteStorage::open(),
  }
  .map_err(|e| eyre!("Failed to open offline store: {}", e))?;

  let client = ApiClient::new(&config.api, Config::get_api_token())
    .map_err(|e| eyre!("Failed to create API client: {}", e))?;
  let fetcher = Arc::new(RemoteUnitFetcher::new(client.clone(), client));
  let cache = OfflineCache::new(storage, fetcher, DownloadOptions::from(&config.cache));

  match args.command {
    Command::Download { manifest } => commands::download(&cache, &manifest).await,
    Command::Status { subject_id } => commands::status(&cache, &subject_id).await,
    Command::Show { subject_id } => commands::show(&cache, &subject_id).await,
    Command::Export { subject_id, dir } => {
      let written = commands::export(&cache, &subject_id, &dir).await?;
      println!("Wrote {} file(s) to {}", written.len(), dir.display());
      Ok(())
    }
    Command::List => commands::list(&cache).await,
    Command::Remove { subject_id } => commands::remove(&cache, &subject_id).await,
  }
}
