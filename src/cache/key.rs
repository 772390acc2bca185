//! Request identity used as the cache key.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::fmt;
use url::Url;

/// Identity of a cacheable request: a GET of one exact URL.
///
/// The URL string is used verbatim, query included. `?assets=a&v=1` and
/// `?v=1&assets=a` are different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  url: Url,
}

impl RequestKey {
  /// Key for a GET of `url`.
  pub fn get(url: Url) -> Self {
    Self { url }
  }

  /// Key for a request, or `None` when the method can't be cached.
  pub fn for_request(method: &Method, url: &Url) -> Option<Self> {
    (*method == Method::GET).then(|| Self::get(url.clone()))
  }

  pub fn parse(s: &str) -> Result<Self> {
    let url = Url::parse(s).map_err(|e| eyre!("Invalid cache key '{}': {}", s, e))?;
    Ok(Self::get(url))
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn as_str(&self) -> &str {
    self.url.as_str()
  }

  pub fn method(&self) -> Method {
    Method::GET
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method(), self.url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_query_order_is_significant() {
    let a = RequestKey::parse("https://tsd.test/?assets=app.js&v=1").unwrap();
    let b = RequestKey::parse("https://tsd.test/?v=1&assets=app.js").unwrap();
    assert_ne!(a, b);
    assert_eq!(a.as_str(), "https://tsd.test/?assets=app.js&v=1");
  }

  #[test]
  fn test_only_get_has_a_key() {
    let url = Url::parse("https://tsd.test/api").unwrap();
    assert!(RequestKey::for_request(&Method::GET, &url).is_some());
    assert!(RequestKey::for_request(&Method::POST, &url).is_none());
  }

  #[test]
  fn test_display_includes_method() {
    let key = RequestKey::parse("https://tsd.test/index.html").unwrap();
    assert_eq!(key.to_string(), "GET https://tsd.test/index.html");
  }
}
