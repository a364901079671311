use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

use super::key::QueryKey;
use crate::error::QueryError;

/// Lifecycle of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Never loaded
  Idle,
  /// A load is in flight
  Loading,
  /// Last load succeeded (or data was written directly)
  Success,
  /// Last load failed; previous data, if any, is retained
  Error,
}

/// Snapshot of the state cached under one key.
///
/// `Success` implies `data` is set and `error` is empty; `Error` implies
/// `error` is set. `updated_at == None` means the entry is stale
/// regardless of the configured stale time.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEntry {
  pub key: QueryKey,
  pub status: QueryStatus,
  pub data: Option<Value>,
  pub error: Option<QueryError>,
  /// Monotonic time of the last successful write, cleared by invalidation
  pub updated_at: Option<Instant>,
  /// Wall-clock time of the last successful write, for display
  pub fetched_at: Option<DateTime<Utc>>,
  pub subscriber_count: usize,
}

impl QueryEntry {
  pub(crate) fn idle(key: QueryKey) -> Self {
    Self {
      key,
      status: QueryStatus::Idle,
      data: None,
      error: None,
      updated_at: None,
      fetched_at: None,
      subscriber_count: 0,
    }
  }

  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  /// Whether data is older than `stale_time` (or was invalidated).
  pub fn is_stale(&self, now: Instant, stale_time: Duration) -> bool {
    match self.updated_at {
      Some(at) => now.saturating_duration_since(at) >= stale_time,
      None => true,
    }
  }

  /// Whether a fetch may be answered from this entry without loading.
  pub fn is_fresh(&self, now: Instant, stale_time: Duration) -> bool {
    self.is_success() && !self.is_stale(now, stale_time)
  }

  /// Decode the cached payload.
  pub fn data_as<T: DeserializeOwned>(&self) -> Option<Result<T, QueryError>> {
    self
      .data
      .as_ref()
      .map(|v| serde_json::from_value(v.clone()).map_err(QueryError::from))
  }

  pub(crate) fn write_success(&mut self, data: Value, now: Instant) {
    self.status = QueryStatus::Success;
    self.data = Some(data);
    self.error = None;
    self.updated_at = Some(now);
    self.fetched_at = Some(Utc::now());
  }

  pub(crate) fn write_error(&mut self, error: QueryError) {
    self.status = QueryStatus::Error;
    self.error = Some(error);
  }

  /// Status to fall back to when a load is abandoned.
  pub(crate) fn settled_status(&self) -> QueryStatus {
    if self.error.is_some() {
      QueryStatus::Error
    } else if self.data.is_some() {
      QueryStatus::Success
    } else {
      QueryStatus::Idle
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_idle_entry_is_stale() {
    let entry = QueryEntry::idle(QueryKey::new("cars"));
    assert_eq!(entry.status, QueryStatus::Idle);
    assert!(entry.is_stale(Instant::now(), Duration::from_secs(60)));
    assert!(!entry.is_fresh(Instant::now(), Duration::from_secs(60)));
  }

  #[test]
  fn test_write_success_clears_error() {
    let mut entry = QueryEntry::idle(QueryKey::new("cars"));
    entry.write_error(QueryError::Network("down".into()));
    assert!(entry.is_error());

    let now = Instant::now();
    entry.write_success(json!([1, 2]), now);
    assert!(entry.is_success());
    assert!(entry.error.is_none());
    assert_eq!(entry.data, Some(json!([1, 2])));
    assert!(entry.is_fresh(now, Duration::from_secs(1)));
    assert!(entry.fetched_at.is_some());
  }

  #[test]
  fn test_error_keeps_previous_data() {
    let mut entry = QueryEntry::idle(QueryKey::new("cars"));
    entry.write_success(json!({"id": 1}), Instant::now());
    entry.write_error(QueryError::Timeout(Duration::from_secs(3)));
    assert!(entry.is_error());
    assert_eq!(entry.data, Some(json!({"id": 1})));
    assert_eq!(entry.settled_status(), QueryStatus::Error);
  }

  #[test]
  fn test_zero_stale_time_is_immediately_stale() {
    let mut entry = QueryEntry::idle(QueryKey::new("cars"));
    let now = Instant::now();
    entry.write_success(json!(1), now);
    assert!(entry.is_stale(now, Duration::ZERO));
  }

  #[test]
  fn test_data_as() {
    let mut entry = QueryEntry::idle(QueryKey::new("ids"));
    assert!(entry.data_as::<Vec<u32>>().is_none());
    entry.write_success(json!([1, 2, 3]), Instant::now());
    assert_eq!(entry.data_as::<Vec<u32>>(), Some(Ok(vec![1, 2, 3])));
    assert!(matches!(
      entry.data_as::<String>(),
      Some(Err(QueryError::Decode(_)))
    ));
  }
}
