//! Core types for the response cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Status used for responses produced locally when neither network nor cache can answer.
pub const SYNTHETIC_FAILURE_STATUS: u16 = 503;

/// How a response relates to the origin that requested it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
  /// Same-origin response with readable status and headers
  Basic,
  /// Cross-origin response fetched without CORS
  Opaque,
  /// Locally produced failure response
  Error,
}

impl ResponseKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseKind::Basic => "basic",
      ResponseKind::Opaque => "opaque",
      ResponseKind::Error => "error",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(ResponseKind::Basic),
      "opaque" => Some(ResponseKind::Opaque),
      "error" => Some(ResponseKind::Error),
      _ => None,
    }
  }
}

/// An HTTP response as seen by the cache controller.
///
/// Header names are stored lowercased so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub url: String,
  pub status: u16,
  pub kind: ResponseKind,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(url: impl Into<String>, status: u16, kind: ResponseKind) -> Self {
    Self {
      url: url.into(),
      status,
      kind,
      headers: BTreeMap::new(),
      body: Vec::new(),
    }
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  /// Add a header value, joining repeated headers with `", "`.
  pub fn append_header(&mut self, name: &str, value: &str) {
    self
      .headers
      .entry(name.to_ascii_lowercase())
      .and_modify(|existing| {
        existing.push_str(", ");
        existing.push_str(value);
      })
      .or_insert_with(|| value.to_string());
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  /// Failure response handed to the page when no network and no cached copy exist.
  pub fn unavailable(url: impl Into<String>) -> Self {
    Self::new(url, SYNTHETIC_FAILURE_STATUS, ResponseKind::Error)
      .with_header("content-type", "text/plain; charset=utf-8")
      .with_body("Offline: resource is not available")
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  pub fn etag(&self) -> Option<&str> {
    self.header("etag")
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// SHA-256 of the body, hex encoded.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(&self.body);
    hex::encode(hasher.finalize())
  }
}

/// A response stored in one cache generation.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: Response,
  /// Body digest recorded at write time
  pub digest: String,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

impl CachedEntry {
  /// Whether `fresh` carries different content than this entry.
  ///
  /// ETags are compared when both sides have one; otherwise a missing ETag on
  /// exactly one side counts as a change, and two untagged bodies are compared
  /// by digest.
  pub fn differs_from(&self, fresh: &Response) -> bool {
    match (self.response.etag(), fresh.etag()) {
      (Some(old), Some(new)) => old != new,
      (None, None) => self.digest != fresh.digest(),
      _ => true,
    }
  }
}

/// Which responses may be written to the cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct CachePolicy {
  /// Also store cross-origin opaque responses
  pub allow_opaque: bool,
}

impl CachePolicy {
  pub fn is_cacheable(&self, response: &Response) -> bool {
    if response.status != 200 {
      return false;
    }
    match response.kind {
      ResponseKind::Basic => true,
      ResponseKind::Opaque => self.allow_opaque,
      ResponseKind::Error => false,
    }
  }
}

/// Indicates where a response handed to the page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Served from cache, background refresh may be in flight
  Cache,
  /// Network unavailable, serving the cached shell entry point
  Offline,
  /// Neither network nor cache could answer
  Synthetic,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(response: Response) -> CachedEntry {
    CachedEntry {
      digest: response.digest(),
      response,
      cached_at: Utc::now(),
    }
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let response = Response::new("https://tsd.test/", 200, ResponseKind::Basic).with_header("ETag", "\"a\"");
    assert_eq!(response.etag(), Some("\"a\""));
    assert_eq!(response.header("etag"), Some("\"a\""));
  }

  #[test]
  fn test_repeated_headers_are_joined() {
    let mut response = Response::new("https://tsd.test/", 200, ResponseKind::Basic);
    response.append_header("Vary", "Accept");
    response.append_header("vary", "Accept-Encoding");
    assert_eq!(response.header("vary"), Some("Accept, Accept-Encoding"));
  }

  #[test]
  fn test_policy_rejects_non_200_and_errors() {
    let policy = CachePolicy::default();
    assert!(policy.is_cacheable(&Response::new("u", 200, ResponseKind::Basic)));
    assert!(!policy.is_cacheable(&Response::new("u", 404, ResponseKind::Basic)));
    assert!(!policy.is_cacheable(&Response::new("u", 206, ResponseKind::Basic)));
    assert!(!policy.is_cacheable(&Response::unavailable("u")));
  }

  #[test]
  fn test_policy_opaque_needs_opt_in() {
    let opaque = Response::new("https://cdn.test/lib.js", 200, ResponseKind::Opaque);
    assert!(!CachePolicy::default().is_cacheable(&opaque));
    assert!(CachePolicy { allow_opaque: true }.is_cacheable(&opaque));
  }

  #[test]
  fn test_change_detection_prefers_etag() {
    let old = entry(Response::new("u", 200, ResponseKind::Basic).with_header("etag", "v1").with_body("same"));
    let same_tag = Response::new("u", 200, ResponseKind::Basic).with_header("etag", "v1").with_body("other");
    let new_tag = Response::new("u", 200, ResponseKind::Basic).with_header("etag", "v2").with_body("same");
    assert!(!old.differs_from(&same_tag));
    assert!(old.differs_from(&new_tag));
  }

  #[test]
  fn test_change_detection_falls_back_to_digest() {
    let old = entry(Response::new("u", 200, ResponseKind::Basic).with_body("body"));
    assert!(!old.differs_from(&Response::new("u", 200, ResponseKind::Basic).with_body("body")));
    assert!(old.differs_from(&Response::new("u", 200, ResponseKind::Basic).with_body("changed")));
  }
}
