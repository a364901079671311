//! JSON-over-HTTP transport with normalized results.

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::QueryError;

/// Outcome of one request.
///
/// `ok` is true for 2xx responses; `data` then holds the decoded body
/// (`null` when empty). Otherwise `error` says what went wrong and `status`
/// is the HTTP status, or 0 if no response arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
  pub ok: bool,
  pub status: u16,
  pub data: Option<Value>,
  pub error: Option<QueryError>,
}

impl HttpResponse {
  fn success(status: u16, data: Value) -> Self {
    Self {
      ok: true,
      status,
      data: Some(data),
      error: None,
    }
  }

  fn failure(status: u16, error: QueryError) -> Self {
    Self {
      ok: false,
      status,
      data: None,
      error: Some(error),
    }
  }

  /// Convert into the loader shape.
  pub fn into_result(self) -> Result<Value, QueryError> {
    if self.ok {
      Ok(self.data.unwrap_or(Value::Null))
    } else {
      Err(
        self
          .error
          .unwrap_or_else(|| QueryError::Network("request failed".to_string())),
      )
    }
  }
}

/// Thin wrapper over a `reqwest` client rooted at a base URL.
///
/// No retries here; the cache retries loads when configured to.
#[derive(Clone, Debug)]
pub struct HttpClient {
  client: Client,
  base: Url,
  timeout: Duration,
}

impl HttpClient {
  pub fn new(base: &str, timeout: Duration) -> Result<Self, QueryError> {
    let mut base = Url::parse(base)
      .map_err(|e| QueryError::Validation(format!("invalid base URL {base}: {e}")))?;
    // Relative joins replace the last segment unless the path ends in '/'
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }
    base.set_query(None);
    base.set_fragment(None);
    let client = Client::builder()
      .user_agent(concat!("querydeck/", env!("CARGO_PKG_VERSION")))
      .timeout(timeout)
      .build()
      .map_err(|e| QueryError::Network(e.to_string()))?;
    Ok(Self {
      client,
      base,
      timeout,
    })
  }

  pub fn base(&self) -> &Url {
    &self.base
  }

  /// Resolve `path` under the base URL, keeping any base path prefix.
  pub fn url(&self, path: &str) -> Result<Url, QueryError> {
    self
      .base
      .join(path.trim_start_matches('/'))
      .map_err(|e| QueryError::Validation(format!("invalid path {path}: {e}")))
  }

  pub async fn get(&self, path: &str, query: &[(&str, String)]) -> HttpResponse {
    self.send(Method::GET, path, query, None).await
  }

  /// GET and return the decoded body or the normalized error.
  pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, QueryError> {
    self.get(path, query).await.into_result()
  }

  pub async fn send(
    &self,
    method: Method,
    path: &str,
    query: &[(&str, String)],
    body: Option<Value>,
  ) -> HttpResponse {
    let mut url = match self.url(path) {
      Ok(url) => url,
      Err(err) => return HttpResponse::failure(0, err),
    };
    if !query.is_empty() {
      let mut pairs = url.query_pairs_mut();
      for (name, value) in query {
        pairs.append_pair(name, value);
      }
    }

    debug!(%method, %url, "http request");
    let mut request = self.client.request(method, url);
    if let Some(body) = body {
      request = request.json(&body);
    }

    let response = match request.send().await {
      Ok(response) => response,
      Err(err) => return HttpResponse::failure(0, self.transport_error(&err)),
    };

    let status = response.status();
    let bytes = match response.bytes().await {
      Ok(bytes) => bytes,
      Err(err) => return HttpResponse::failure(status.as_u16(), self.transport_error(&err)),
    };

    if !status.is_success() {
      return HttpResponse::failure(
        status.as_u16(),
        QueryError::Http {
          status: status.as_u16(),
          message: error_message(status, &bytes),
        },
      );
    }

    if bytes.is_empty() {
      return HttpResponse::success(status.as_u16(), Value::Null);
    }
    match serde_json::from_slice(&bytes) {
      Ok(data) => HttpResponse::success(status.as_u16(), data),
      Err(err) => HttpResponse::failure(status.as_u16(), QueryError::from(err)),
    }
  }

  fn transport_error(&self, err: &reqwest::Error) -> QueryError {
    if err.is_timeout() {
      QueryError::Timeout(self.timeout)
    } else {
      QueryError::Network(err.to_string())
    }
  }
}

/// Prefer a `message` field from a JSON error body, then the raw body, then
/// the status reason.
fn error_message(status: StatusCode, body: &[u8]) -> String {
  if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) {
    if let Some(message) = map.get("message").and_then(Value::as_str) {
      return message.to_string();
    }
  }
  let text = String::from_utf8_lossy(body).trim().to_string();
  if text.is_empty() {
    status
      .canonical_reason()
      .unwrap_or("request failed")
      .to_string()
  } else {
    text
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  /// Serve canned responses by request path. `/hang` never answers.
  async fn serve() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      loop {
        let Ok((mut socket, _)) = listener.accept().await else {
          break;
        };
        tokio::spawn(async move {
          let mut buf = vec![0u8; 4096];
          let n = socket.read(&mut buf).await.unwrap_or(0);
          let request = String::from_utf8_lossy(&buf[..n]).to_string();
          let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

          let (status, body) = match path.as_str() {
            "/posts?_page=2" => ("200 OK", r#"[{"id":11}]"#.to_string()),
            "/api/v1/posts" => ("200 OK", r#"[{"id":7}]"#.to_string()),
            p if p.starts_with("/posts/1") => ("200 OK", r#"{"id":1,"title":"hi"}"#.to_string()),
            "/empty" => ("204 No Content", String::new()),
            "/broken" => ("200 OK", "{not json".to_string()),
            "/boom" => ("500 Internal Server Error", r#"{"message":"db down"}"#.to_string()),
            "/hang" => {
              tokio::time::sleep(Duration::from_secs(30)).await;
              return;
            }
            _ => ("404 Not Found", String::new()),
          };
          let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
          );
          let _ = socket.write_all(response.as_bytes()).await;
        });
      }
    });
    format!("http://{addr}")
  }

  #[tokio::test]
  async fn test_success_decodes_body() {
    let client = HttpClient::new(&serve().await, Duration::from_secs(5)).unwrap();
    let response = client.get("posts/1", &[]).await;
    assert!(response.ok);
    assert_eq!(response.status, 200);
    assert_eq!(response.data, Some(json!({"id": 1, "title": "hi"})));
    assert!(response.error.is_none());
  }

  #[test]
  fn test_url_keeps_base_path() {
    for base in ["https://example.com/api/v1", "https://example.com/api/v1/"] {
      let client = HttpClient::new(base, Duration::from_secs(5)).unwrap();
      assert_eq!(
        client.url("/posts").unwrap().as_str(),
        "https://example.com/api/v1/posts"
      );
      assert_eq!(
        client.url("posts/3").unwrap().as_str(),
        "https://example.com/api/v1/posts/3"
      );
    }
    let root = HttpClient::new("https://example.com", Duration::from_secs(5)).unwrap();
    assert_eq!(root.url("/posts").unwrap().as_str(), "https://example.com/posts");
  }

  #[tokio::test]
  async fn test_requests_sent_under_base_path() {
    let base = format!("{}/api/v1", serve().await);
    let client = HttpClient::new(&base, Duration::from_secs(5)).unwrap();
    let data = client.get_json("/posts", &[]).await.unwrap();
    assert_eq!(data, json!([{"id": 7}]));
  }

  #[tokio::test]
  async fn test_query_parameters_appended() {
    let client = HttpClient::new(&serve().await, Duration::from_secs(5)).unwrap();
    let data = client
      .get_json("posts", &[("_page", "2".to_string())])
      .await
      .unwrap();
    assert_eq!(data, json!([{"id": 11}]));
  }

  #[tokio::test]
  async fn test_not_found_is_http_error() {
    let client = HttpClient::new(&serve().await, Duration::from_secs(5)).unwrap();
    let response = client.get("missing", &[]).await;
    assert!(!response.ok);
    assert_eq!(response.status, 404);
    assert_eq!(
      response.error,
      Some(QueryError::Http {
        status: 404,
        message: "Not Found".into()
      })
    );
  }

  #[tokio::test]
  async fn test_server_error_message_and_retryable() {
    let client = HttpClient::new(&serve().await, Duration::from_secs(5)).unwrap();
    let err = client.get_json("boom", &[]).await.unwrap_err();
    assert_eq!(
      err,
      QueryError::Http {
        status: 500,
        message: "db down".into()
      }
    );
    assert!(err.is_retryable());
  }

  #[tokio::test]
  async fn test_empty_and_malformed_bodies() {
    let client = HttpClient::new(&serve().await, Duration::from_secs(5)).unwrap();
    assert_eq!(client.get_json("empty", &[]).await, Ok(Value::Null));
    assert!(matches!(
      client.get_json("broken", &[]).await,
      Err(QueryError::Decode(_))
    ));
  }

  #[tokio::test]
  async fn test_timeout_and_refused_connection() {
    let client = HttpClient::new(&serve().await, Duration::from_millis(200)).unwrap();
    assert_eq!(
      client.get_json("hang", &[]).await,
      Err(QueryError::Timeout(Duration::from_millis(200)))
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = HttpClient::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
    let response = client.get("anything", &[]).await;
    assert_eq!(response.status, 0);
    assert!(matches!(response.error, Some(QueryError::Network(_))));
  }

  #[test]
  fn test_invalid_base_url() {
    assert!(matches!(
      HttpClient::new("not a url", Duration::from_secs(1)),
      Err(QueryError::Validation(_))
    ));
  }
}
