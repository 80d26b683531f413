mod commands;
mod event;
mod remote;
mod shell;

use clap::Parser;
use color_eyre::Result;
use portal_cache::config::Config;
use portal_cache::{logging, CacheStore, QueryClient, RefreshCoordinator};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "portal-cache")]
#[command(about = "Interactive shell for the portal read cache and refresh coordinator")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/portal-cache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log filter, overriding the config file (RUST_LOG still wins)
  #[arg(short, long)]
  log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(level) = args.log_level {
    config.logging.level = level;
  }

  // Held until exit so file logs are flushed
  let _log_guard = logging::init(&config.logging)?;

  let store = CacheStore::new();
  let coordinator = RefreshCoordinator::new(store, config.cache.high_priority_prefixes.clone());
  let client = QueryClient::new(coordinator).with_policy(config.cache.fetch_policy());
  let remote = remote::RemoteStore::seeded(Duration::from_millis(config.shell.latency_ms));
  info!(
    ttl_secs = config.cache.default_ttl_secs,
    refresh_secs = config.cache.refresh_interval_secs,
    "Starting shell"
  );

  let mut shell = shell::Shell::new(client, remote, config.cache.query_options());
  shell
    .run(Duration::from_millis(config.shell.tick_rate_ms))
    .await?;

  Ok(())
}
