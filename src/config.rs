use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::QueryConfig;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
  pub cache: CacheConfig,
  pub api: ApiConfig,
  pub mock: MockConfig,
  pub ui: UiConfig,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
  pub stale_time_ms: u64,
  pub gc_time_ms: u64,
  /// Extra attempts after a network error, timeout or 5xx
  pub retry_count: u32,
  pub retry_delay_ms: u64,
  /// Per-attempt limit; unset means no limit
  pub timeout_ms: Option<u64>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time_ms: 5 * 60 * 1000,
      gc_time_ms: 5 * 60 * 1000,
      retry_count: 1,
      retry_delay_ms: 1000,
      timeout_ms: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
  /// Base URL of the posts API; empty disables the posts screens
  pub posts_url: String,
  pub request_timeout_ms: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      posts_url: "https://jsonplaceholder.typicode.com".to_string(),
      request_timeout_ms: 10_000,
    }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct MockConfig {
  /// Simulated round trip of the in-memory backend
  pub latency_ms: u64,
}

impl Default for MockConfig {
  fn default() -> Self {
    Self { latency_ms: 500 }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StartView {
  #[default]
  Cars,
  Employees,
  Users,
  Posts,
  Uploads,
}

impl std::str::FromStr for StartView {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "cars" => Ok(StartView::Cars),
      "employees" | "team" => Ok(StartView::Employees),
      "users" => Ok(StartView::Users),
      "posts" | "blog" => Ok(StartView::Posts),
      "uploads" | "files" => Ok(StartView::Uploads),
      other => Err(format!("unknown view: {other}")),
    }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct UiConfig {
  pub tick_rate_ms: u64,
  /// Rows per page in the cars manager
  pub page_size: usize,
  pub max_visible_pages: usize,
  pub start_view: StartView,
  /// Custom title for header
  pub title: Option<String>,
}

impl Default for UiConfig {
  fn default() -> Self {
    Self {
      tick_rate_ms: 100,
      page_size: 50,
      max_visible_pages: 5,
      start_view: StartView::Cars,
      title: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
  pub level: String,
  /// Directory for log files; defaults to the platform state/cache dir
  pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      dir: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./querydeck.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/querydeck/config.yaml
  ///
  /// Without a file the defaults apply.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("querydeck.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("querydeck").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    // An empty file is a valid, all-defaults config
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.ui.page_size == 0 {
      return Err(eyre!("ui.page_size must be at least 1"));
    }
    if self.ui.tick_rate_ms == 0 {
      return Err(eyre!("ui.tick_rate_ms must be at least 1"));
    }
    Ok(())
  }

  /// Cache defaults derived from the `cache` section.
  pub fn query_config(&self) -> QueryConfig {
    let cache = &self.cache;
    let config = QueryConfig::new(
      Duration::from_millis(cache.stale_time_ms),
      Duration::from_millis(cache.gc_time_ms),
    )
    .with_retry(cache.retry_count, Duration::from_millis(cache.retry_delay_ms));
    match cache.timeout_ms {
      Some(ms) => config.with_timeout(Duration::from_millis(ms)),
      None => config,
    }
  }

  pub fn tick_rate(&self) -> Duration {
    Duration::from_millis(self.ui.tick_rate_ms)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.api.request_timeout_ms)
  }

  pub fn mock_latency(&self) -> Duration {
    Duration::from_millis(self.mock.latency_ms)
  }

  /// Where log files go: `log.dir`, else the platform cache dir.
  pub fn log_dir(&self) -> PathBuf {
    self.log.dir.clone().unwrap_or_else(|| {
      dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("querydeck")
    })
  }
}
