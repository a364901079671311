//! Result metadata and listener types for the cache.

use std::sync::Arc;

use super::entry::QueryEntry;

/// Result from a cache fetch, including data and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  /// Data produced by a loader this call started.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  /// Fresh data served without running the loader.
  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
    }
  }

  /// Data from a load another caller had already started.
  pub fn deduped(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Deduped,
    }
  }

  /// Transform the payload, keeping the source.
  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
    }
  }
}

/// Indicates where fetched data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// This call ran the loader
  Network,
  /// Cached and still fresh, loader not called
  CacheFresh,
  /// Joined an in-flight load started by someone else
  Deduped,
}

/// Callback invoked with the new entry whenever a subscribed key changes.
pub type Listener = Arc<dyn Fn(&QueryEntry) + Send + Sync>;
