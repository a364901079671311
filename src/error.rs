//! Typed failures shared by loaders, the cache and mutations.

use std::time::Duration;
use thiserror::Error;

/// Error kinds a loader or mutation can fail with.
///
/// Errors are stored on cache entries and handed to every waiter of a
/// deduplicated load, so they must be cheap to clone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
  /// Transport failure (connection refused, DNS, reset, ...)
  #[error("Network error: {0}")]
  Network(String),

  /// Server answered with a non-2xx status
  #[error("HTTP {status}: {message}")]
  Http { status: u16, message: String },

  #[error("Request timed out after {}ms", .0.as_millis())]
  Timeout(Duration),

  /// Caller-supplied input rejected before or by the operation
  #[error("Validation failed: {0}")]
  Validation(String),

  /// Entity absent from the backing store
  #[error("Not found: {0}")]
  NotFound(String),

  /// Payload did not match the requested type
  #[error("Failed to decode response: {0}")]
  Decode(String),

  #[error("Request was cancelled")]
  Cancelled,
}

impl QueryError {
  /// Whether a retry could plausibly succeed.
  pub fn is_retryable(&self) -> bool {
    match self {
      QueryError::Network(_) | QueryError::Timeout(_) => true,
      QueryError::Http { status, .. } => *status >= 500,
      _ => false,
    }
  }

  /// HTTP status, when the failure came from a response.
  pub fn status(&self) -> Option<u16> {
    match self {
      QueryError::Http { status, .. } => Some(*status),
      _ => None,
    }
  }
}

impl From<serde_json::Error> for QueryError {
  fn from(err: serde_json::Error) -> Self {
    QueryError::Decode(err.to_string())
  }
}
