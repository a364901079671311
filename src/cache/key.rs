//! Query identities.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity under which a fetched result is cached.
///
/// A key is an ordered list of JSON segments, usually a namespace followed by
/// parameters: `["employees", {"page": 2, "search": "ra"}]`. Two keys are equal
/// iff their canonical serialized forms match. Object members are serialized
/// in sorted order, so parameter objects compare by value.
#[derive(Clone)]
pub struct QueryKey {
  parts: Vec<Value>,
  canonical: String,
}

impl QueryKey {
  /// Create a key with a single namespace segment.
  pub fn new(namespace: impl Into<String>) -> Self {
    Self::from_parts(vec![Value::String(namespace.into())])
  }

  /// Create a key from raw segments.
  pub fn from_parts(parts: Vec<Value>) -> Self {
    let canonical = Value::Array(parts.clone()).to_string();
    Self { parts, canonical }
  }

  /// Append a segment.
  ///
  /// Anything serializable works; a value that fails to serialize becomes
  /// `null` rather than panicking.
  pub fn with(self, segment: impl Serialize) -> Self {
    let mut parts = self.parts;
    parts.push(serde_json::to_value(segment).unwrap_or(Value::Null));
    Self::from_parts(parts)
  }

  pub fn parts(&self) -> &[Value] {
    &self.parts
  }

  /// First segment as a string, if it is one.
  pub fn namespace(&self) -> Option<&str> {
    self.parts.first().and_then(Value::as_str)
  }

  /// Whether `prefix` matches the leading segments of this key.
  ///
  /// Every key starts with itself.
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    prefix.parts.len() <= self.parts.len()
      && prefix
        .parts
        .iter()
        .zip(self.parts.iter())
        .all(|(a, b)| a == b)
  }

  /// Canonical serialized form.
  pub fn as_str(&self) -> &str {
    &self.canonical
  }

  /// Short stable digest of the canonical form, for log fields.
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.canonical.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..6])
  }
}

impl PartialEq for QueryKey {
  fn eq(&self, other: &Self) -> bool {
    self.canonical == other.canonical
  }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.canonical.hash(state);
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.canonical)
  }
}

impl fmt::Debug for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "QueryKey({})", self.canonical)
  }
}

impl From<&str> for QueryKey {
  fn from(namespace: &str) -> Self {
    QueryKey::new(namespace)
  }
}
