//! Network access for the offline cache.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use url::{Origin, Url};

use super::request::FetchRequest;
use crate::cache::{Response, ResponseKind};

/// Performs the real network fetch behind a cache miss or revalidation.
///
/// An `Err` means the request never produced a response (offline, DNS,
/// timeout). HTTP error statuses are returned as `Ok` responses.
#[async_trait]
pub trait Network: Send + Sync + 'static {
  async fn fetch(&self, request: &FetchRequest) -> Result<Response>;
}

/// reqwest-backed network.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Origin,
}

impl HttpNetwork {
  pub fn new(origin: &Url, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: origin.origin(),
    })
  }

  fn classify(&self, url: &Url) -> ResponseKind {
    if url.origin() == self.origin {
      ResponseKind::Basic
    } else {
      ResponseKind::Opaque
    }
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &FetchRequest) -> Result<Response> {
    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let final_url = response.url().clone();
    let mut result = Response::new(
      final_url.as_str(),
      response.status().as_u16(),
      self.classify(&final_url),
    );

    // Non-UTF-8 bytes in a value are replaced, not dropped
    for (name, value) in response.headers() {
      result.append_header(name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
    }

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(result.with_body(body.to_vec()))
  }
}

#[cfg(test)]
pub(crate) mod fake {
  use super::*;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex;

  /// Scriptable in-memory network for controller tests.
  #[derive(Default)]
  pub struct FakeNetwork {
    routes: Mutex<HashMap<String, Response>>,
    offline: AtomicBool,
    hits: AtomicUsize,
  }

  impl FakeNetwork {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn serve(&self, url: &str, response: Response) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(url.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
      self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn hits(&self) -> usize {
      self.hits.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl Network for FakeNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<Response> {
      self.hits.fetch_add(1, Ordering::SeqCst);
      if self.offline.load(Ordering::SeqCst) {
        return Err(eyre!("Failed to fetch {}: network unreachable", request.url));
      }
      let routes = self.routes.lock().unwrap();
      Ok(
        routes
          .get(request.url.as_str())
          .cloned()
          .unwrap_or_else(|| Response::new(request.url.as_str(), 404, ResponseKind::Basic)),
      )
    }
  }
}
