mod app;
mod commands;
mod event;
mod logging;
mod ui;

use clap::Parser;
use color_eyre::Result;
use querydeck::api::{DataClient, MockBackend, RemoteApi};
use querydeck::config::{Config, StartView};
use querydeck::QueryCache;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "querydeck")]
#[command(about = "Browse cached cars, team, users, posts and uploads in the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/querydeck/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Screen to open first: cars, employees, users, posts or uploads
  #[arg(short, long)]
  view: Option<StartView>,

  /// Log filter, e.g. "debug" or "querydeck=trace"
  #[arg(long)]
  log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let mut config = Config::load(args.config.as_deref())?;
  if let Some(view) = args.view {
    config.ui.start_view = view;
  }
  if let Some(level) = args.log_level {
    config.log.level = level;
  }

  let _log_guard = logging::init(&config.log_dir(), &config.log.level)?;
  info!(view = ?config.ui.start_view, "starting");

  let cache = QueryCache::with_config(config.query_config());
  let backend = MockBackend::new(config.mock_latency());
  let remote = if config.api.posts_url.trim().is_empty() {
    None
  } else {
    match RemoteApi::new(&config.api.posts_url, config.request_timeout()) {
      Ok(remote) => Some(remote),
      Err(err) => {
        warn!(url = %config.api.posts_url, error = %err, "posts API disabled");
        None
      }
    }
  };
  let client = DataClient::new(cache, backend, remote);

  let mut app = app::App::new(config, client);
  app.run().await?;

  Ok(())
}
