use std::time::Duration;

/// Cache-wide defaults.
///
/// Individual fetches may override any of these through [`FetchOptions`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryConfig {
  /// How long data is considered fresh before a fetch reloads it.
  pub stale_time: Duration,

  /// How long an entry without subscribers is kept before collection.
  pub gc_time: Duration,

  /// Extra attempts after a retryable failure.
  pub retry_count: u32,

  /// Pause between attempts.
  pub retry_delay: Duration,

  /// Upper bound for a single loader attempt, if any.
  pub timeout: Option<Duration>,
}

impl Default for QueryConfig {
  fn default() -> Self {
    Self {
      stale_time: Duration::ZERO,
      gc_time: Duration::from_secs(5 * 60),
      retry_count: 0,
      retry_delay: Duration::from_secs(1),
      timeout: None,
    }
  }
}

impl QueryConfig {
  #[must_use]
  pub const fn new(stale_time: Duration, gc_time: Duration) -> Self {
    Self {
      stale_time,
      gc_time,
      retry_count: 0,
      retry_delay: Duration::from_secs(1),
      timeout: None,
    }
  }

  #[must_use]
  pub const fn with_retry(mut self, retry_count: u32, retry_delay: Duration) -> Self {
    self.retry_count = retry_count;
    self.retry_delay = retry_delay;
    self
  }

  #[must_use]
  pub const fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }
}

/// Per-fetch overrides of [`QueryConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
  pub stale_time: Option<Duration>,
  pub retry_count: Option<u32>,
  pub retry_delay: Option<Duration>,
  pub timeout: Option<Duration>,
}

impl FetchOptions {
  #[must_use]
  pub fn stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = Some(stale_time);
    self
  }

  #[must_use]
  pub fn retry(mut self, count: u32, delay: Duration) -> Self {
    self.retry_count = Some(count);
    self.retry_delay = Some(delay);
    self
  }

  #[must_use]
  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  /// Fill unset fields from the cache defaults.
  pub(crate) fn resolve(&self, config: &QueryConfig) -> ResolvedOptions {
    ResolvedOptions {
      stale_time: self.stale_time.unwrap_or(config.stale_time),
      retry_count: self.retry_count.unwrap_or(config.retry_count),
      retry_delay: self.retry_delay.unwrap_or(config.retry_delay),
      timeout: self.timeout.or(config.timeout),
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedOptions {
  pub stale_time: Duration,
  pub retry_count: u32,
  pub retry_delay: Duration,
  pub timeout: Option<Duration>,
}
