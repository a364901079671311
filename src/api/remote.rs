//! JSONPlaceholder-style posts API over HTTP.

use serde_json::Value;
use std::time::Duration;

use super::types::Post;
use crate::error::QueryError;
use crate::http::HttpClient;

#[derive(Clone, Debug)]
pub struct RemoteApi {
  http: HttpClient,
}

impl RemoteApi {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self, QueryError> {
    Ok(Self {
      http: HttpClient::new(base_url, timeout)?,
    })
  }

  pub fn base_url(&self) -> &str {
    self.http.base().as_str()
  }

  /// Every post. The API has no total count, so lists page client-side.
  pub async fn posts(&self) -> Result<Value, QueryError> {
    let data = self.http.get_json("posts", &[]).await?;
    // Shape check only; the cache keeps the raw payload
    serde_json::from_value::<Vec<Post>>(data.clone())?;
    Ok(data)
  }

  pub async fn post(&self, id: u64) -> Result<Value, QueryError> {
    let data = self.http.get_json(&format!("posts/{id}"), &[]).await?;
    // JSONPlaceholder answers unknown ids with an empty object
    if data.as_object().is_some_and(|map| map.is_empty()) {
      return Err(QueryError::NotFound(format!("Post {id} not found")));
    }
    serde_json::from_value::<Post>(data.clone())?;
    Ok(data)
  }
}
