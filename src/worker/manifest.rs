//! Precache manifest and cache generation naming.

use color_eyre::{eyre::eyre, Result};
use url::Url;

/// Shell assets needed to start the app offline.
///
/// Assets are served by the backend under `?assets=<name>`.
pub const DEFAULT_MANIFEST: &[&str] = &[
  "/",
  "/index.html",
  "/manifest.json",
  "/?assets=app.js",
  "/?assets=app.css",
  "/?assets=zxing.min.js",
  "/?assets=icon-192.png",
  "/?assets=icon-512.png",
];

/// Ordered, de-duplicated list of absolute URLs to precache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
  urls: Vec<Url>,
}

impl Manifest {
  /// Resolve `entries` against `origin`. Later duplicates are dropped.
  pub fn resolve<S: AsRef<str>>(origin: &Url, entries: &[S]) -> Result<Self> {
    let mut urls: Vec<Url> = Vec::with_capacity(entries.len());
    for entry in entries {
      let entry = entry.as_ref();
      let url = origin
        .join(entry)
        .map_err(|e| eyre!("Invalid precache entry '{}': {}", entry, e))?;
      if !urls.contains(&url) {
        urls.push(url);
      }
    }
    Ok(Self { urls })
  }

  pub fn urls(&self) -> &[Url] {
    &self.urls
  }

  pub fn len(&self) -> usize {
    self.urls.len()
  }

  pub fn is_empty(&self) -> bool {
    self.urls.is_empty()
  }
}

/// Names of the precache and runtime caches for one worker version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGenerations {
  pub precache: String,
  pub runtime: String,
}

impl CacheGenerations {
  pub fn new(prefix: &str, version: &str) -> Self {
    Self {
      precache: format!("{}-precache-{}", prefix, version),
      runtime: format!("{}-runtime-{}", prefix, version),
    }
  }

  pub fn is_current(&self, name: &str) -> bool {
    name == self.precache || name == self.runtime
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resolve_keeps_order_and_query() {
    let origin = Url::parse("https://tsd.test/").unwrap();
    let manifest = Manifest::resolve(&origin, &["/index.html", "/?assets=app.js", "/index.html"]).unwrap();

    let urls: Vec<&str> = manifest.urls().iter().map(Url::as_str).collect();
    assert_eq!(
      urls,
      vec!["https://tsd.test/index.html", "https://tsd.test/?assets=app.js"]
    );
  }

  #[test]
  fn test_default_manifest_resolves() {
    let origin = Url::parse("https://tsd.test/").unwrap();
    let manifest = Manifest::resolve(&origin, DEFAULT_MANIFEST).unwrap();
    assert_eq!(manifest.len(), DEFAULT_MANIFEST.len());
  }

  #[test]
  fn test_generation_names() {
    let generations = CacheGenerations::new("tsd", "v2");
    assert_eq!(generations.precache, "tsd-precache-v2");
    assert_eq!(generations.runtime, "tsd-runtime-v2");
    assert!(generations.is_current("tsd-runtime-v2"));
    assert!(!generations.is_current("tsd-runtime-v1"));
  }
}
