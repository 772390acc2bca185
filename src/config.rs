use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::worker::DEFAULT_MANIFEST;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the shell is served from (e.g. "https://tsd.example.com")
  pub origin: String,
  /// Worker version; tags cache generation names
  pub version: String,
  #[serde(default = "default_cache_prefix")]
  pub cache_prefix: String,
  /// Page served for navigations while offline
  #[serde(default = "default_shell_entry")]
  pub shell_entry: String,
  /// Assets stored at install, relative to `origin`
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  /// Also cache cross-origin opaque responses
  #[serde(default)]
  pub allow_opaque: bool,
  #[serde(default = "default_timeout_secs")]
  pub network_timeout_secs: u64,
  /// Cache database path (defaults to the platform data directory)
  pub database: Option<PathBuf>,
  /// Write logs to daily files in this directory instead of stderr
  pub log_dir: Option<PathBuf>,
  pub backend: BackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// URL of the page the app runs on; the endpoint is derived from it
  pub page_url: String,
  #[serde(default = "default_api_path")]
  pub api_path: String,
}

fn default_cache_prefix() -> String {
  "tsd".to_string()
}

fn default_shell_entry() -> String {
  "/index.html".to_string()
}

fn default_precache() -> Vec<String> {
  DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect()
}

fn default_timeout_secs() -> u64 {
  10
}

fn default_api_path() -> String {
  "api".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tsd.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tsd-shell/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/tsd-shell/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tsd.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tsd-shell").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.origin_url()?;
    config.page_url()?;
    Ok(config)
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  pub fn page_url(&self) -> Result<Url> {
    Url::parse(&self.backend.page_url)
      .map_err(|e| eyre!("Invalid page URL '{}': {}", self.backend.page_url, e))
  }

  pub fn network_timeout(&self) -> Duration {
    Duration::from_secs(self.network_timeout_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml(
      r#"
origin: "https://tsd.example.com"
version: "v3"
backend:
  page_url: "https://tsd.example.com/base/tsd/index.html"
"#,
    )
    .unwrap();

    assert_eq!(config.cache_prefix, "tsd");
    assert_eq!(config.shell_entry, "/index.html");
    assert_eq!(config.precache.len(), DEFAULT_MANIFEST.len());
    assert!(!config.allow_opaque);
    assert_eq!(config.network_timeout(), Duration::from_secs(10));
    assert_eq!(config.backend.api_path, "api");
    assert!(config.database.is_none());
  }

  #[test]
  fn test_manifest_override() {
    let config = Config::from_yaml(
      r#"
origin: "https://tsd.example.com"
version: "v3"
precache: ["/index.html", "/?assets=main.js"]
allow_opaque: true
backend:
  page_url: "https://tsd.example.com/index.html"
  api_path: "hs/tsd"
"#,
    )
    .unwrap();

    assert_eq!(config.precache, vec!["/index.html", "/?assets=main.js"]);
    assert!(config.allow_opaque);
    assert_eq!(config.backend.api_path, "hs/tsd");
  }

  #[test]
  fn test_invalid_origin_is_rejected() {
    let result = Config::from_yaml(
      r#"
origin: "not a url"
version: "v1"
backend:
  page_url: "https://tsd.example.com/index.html"
"#,
    );
    assert!(result.is_err());
  }

  #[test]
  fn test_missing_explicit_path() {
    assert!(Config::load(Some(Path::new("/nonexistent/tsd.yaml"))).is_err());
  }
}
