use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::envelope::{CallRequest, CallResponse};

/// Status and raw body of a transport response.
#[derive(Debug, Clone)]
pub struct RawResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

/// Sends one JSON POST. An `Err` means no response was received.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn post_json(&self, url: &Url, body: Vec<u8>) -> Result<RawResponse>;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn post_json(&self, url: &Url, body: Vec<u8>) -> Result<RawResponse> {
    let response = self
      .client
      .post(url.clone())
      .header(CONTENT_TYPE, "application/json")
      .body(body)
      .send()
      .await
      .map_err(|e| eyre!("Failed to reach backend at {}: {}", url, e))?;

    let status = response.status().as_u16();
    // A body that can't be read is treated like an unparseable one
    let body = match response.bytes().await {
      Ok(bytes) => bytes.to_vec(),
      Err(e) => {
        debug!(error = %e, "Failed to read backend response body");
        Vec::new()
      }
    };

    Ok(RawResponse { status, body })
  }
}

/// Derive the backend endpoint from the page URL.
///
/// The endpoint is the page's directory joined with `api_path`:
/// `https://h/base/tsd/index.html` + `api` gives `https://h/base/tsd/api`.
pub fn endpoint_from_page_url(page_url: &Url, api_path: &str) -> Result<Url> {
  let mut base = page_url.clone();
  base.set_query(None);
  base.set_fragment(None);
  base
    .join(api_path.trim_start_matches('/'))
    .map_err(|e| eyre!("Invalid API path '{}': {}", api_path, e))
}

/// Single entry point for every backend read and write.
///
/// Each call is one POST of `{action, params}`; no retries. The response body
/// is parsed best-effort, but transport failures are returned as errors so
/// callers can tell "never reached the server" from "server said no".
#[derive(Clone)]
pub struct Gateway<T: Transport> {
  transport: T,
  endpoint: Url,
}

impl<T: Transport> Gateway<T> {
  pub fn new(transport: T, endpoint: Url) -> Self {
    Self {
      transport,
      endpoint,
    }
  }

  pub fn endpoint(&self) -> &Url {
    &self.endpoint
  }

  pub async fn call(&self, action: &str, params: Value) -> Result<CallResponse> {
    let request = CallRequest::new(action, params);
    let body =
      serde_json::to_vec(&request).map_err(|e| eyre!("Failed to serialize call {}: {}", action, e))?;

    let raw = self.transport.post_json(&self.endpoint, body).await?;
    let response = CallResponse::from_parts(raw.status, &raw.body);
    debug!(action, status = response.status, ok = response.ok, "Backend call");

    Ok(response)
  }

  /// Call an action that takes no parameters.
  pub async fn call_action(&self, action: &str) -> Result<CallResponse> {
    self.call(action, Value::Null).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::Mutex;

  /// Replies with a fixed response and records what was sent.
  struct FakeTransport {
    reply: Option<RawResponse>,
    sent: Mutex<Vec<(Url, Value)>>,
  }

  impl FakeTransport {
    fn replying(status: u16, body: &str) -> Self {
      Self {
        reply: Some(RawResponse {
          status,
          body: body.as_bytes().to_vec(),
        }),
        sent: Mutex::new(Vec::new()),
      }
    }

    fn unreachable() -> Self {
      Self {
        reply: None,
        sent: Mutex::new(Vec::new()),
      }
    }
  }

  #[async_trait]
  impl Transport for FakeTransport {
    async fn post_json(&self, url: &Url, body: Vec<u8>) -> Result<RawResponse> {
      let value: Value = serde_json::from_slice(&body)?;
      self.sent.lock().unwrap().push((url.clone(), value));
      self
        .reply
        .clone()
        .ok_or_else(|| eyre!("Failed to reach backend at {}: connection refused", url))
    }
  }

  fn endpoint() -> Url {
    Url::parse("https://tsd.test/base/tsd/api").unwrap()
  }

  #[tokio::test]
  async fn test_ping_contract() {
    let gateway = Gateway::new(FakeTransport::replying(200, r#"{"result":"pong"}"#), endpoint());

    let response = gateway.call("ping", json!({})).await.unwrap();

    assert_eq!(
      response,
      CallResponse {
        ok: true,
        status: 200,
        data: json!({"result": "pong"}),
      }
    );
    let sent = gateway.transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, endpoint());
    assert_eq!(sent[0].1, json!({"action": "ping", "params": {}}));
  }

  #[tokio::test]
  async fn test_empty_body_yields_empty_data() {
    let gateway = Gateway::new(FakeTransport::replying(200, ""), endpoint());
    let response = gateway.call_action("ping").await.unwrap();
    assert_eq!(
      response,
      CallResponse {
        ok: true,
        status: 200,
        data: json!({}),
      }
    );
  }

  #[tokio::test]
  async fn test_error_status_keeps_data() {
    let gateway = Gateway::new(
      FakeTransport::replying(422, r#"{"description":"Quantity must be positive"}"#),
      endpoint(),
    );
    let response = gateway
      .call("add_operation", json!({"document": "42", "qty": -1}))
      .await
      .unwrap();
    assert!(!response.ok);
    assert_eq!(response.status, 422);
    assert_eq!(response.description(), Some("Quantity must be positive"));
  }

  #[tokio::test]
  async fn test_transport_failure_is_an_error() {
    let gateway = Gateway::new(FakeTransport::unreachable(), endpoint());
    assert!(gateway.call_action("ping").await.is_err());
    // Sent exactly once, no retry
    assert_eq!(gateway.transport.sent.lock().unwrap().len(), 1);
  }

  #[test]
  fn test_endpoint_from_page_url() {
    let page = Url::parse("https://tsd.test/base/tsd/index.html?doc=5#top").unwrap();
    assert_eq!(
      endpoint_from_page_url(&page, "api").unwrap().as_str(),
      "https://tsd.test/base/tsd/api"
    );

    let dir = Url::parse("https://tsd.test/base/tsd/").unwrap();
    assert_eq!(
      endpoint_from_page_url(&dir, "/hs/api").unwrap().as_str(),
      "https://tsd.test/base/tsd/hs/api"
    );
  }
}
