//! Requests offered to the worker for interception.

use reqwest::Method;
use url::Url;

use crate::cache::{RequestKey, Response};

/// Whether a request loads a whole page or something the page needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Full-page load
  Navigate,
  /// Asset, script, data fetch
  Subresource,
}

/// A request intercepted by the offline cache.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  /// Response already fetched by navigation preload, if any
  pub preload: Option<Response>,
}

impl FetchRequest {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      mode: RequestMode::Subresource,
      preload: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_preload(mut self, response: Response) -> Self {
    self.preload = Some(response);
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  pub fn cache_key(&self) -> Option<RequestKey> {
    RequestKey::for_request(&self.method, &self.url)
  }
}
